// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! `cart-sim`: a minimal reference cartridge controller. Not part of the
//! driver's scope, just a fixture so the driver can be exercised end-to-end
//! over a real socket instead of only the in-process test transport.

mod controller_sim;

use cartfs::config::DEFAULT_MAX_CARTRIDGES;
use clap::Parser;
use controller_sim::ControllerSim;
use log::info;
use std::net::TcpListener;

#[derive(Parser)]
#[command(about = "Reference cartridge controller for cartfs")]
struct Opts {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 29_990)]
    port: u16,

    /// Number of cartridges to simulate.
    #[arg(long, default_value_t = DEFAULT_MAX_CARTRIDGES)]
    cartridges: u16,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();

    let addr = format!("{}:{}", opts.host, opts.port);
    let listener = TcpListener::bind(&addr)?;
    info!("cart-sim: listening on {addr} ({} cartridges)", opts.cartridges);

    for stream in listener.incoming() {
        let stream = stream?;
        info!("cart-sim: accepted connection from {:?}", stream.peer_addr());
        let mut sim = ControllerSim::new(opts.cartridges);
        sim.serve(&stream);
    }

    Ok(())
}
