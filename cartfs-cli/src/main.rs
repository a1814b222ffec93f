// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! `cartctl`: a command-line client for exercising a [`cartfs::Driver`]
//! against a running `cart-sim`. It opens one connection and then runs a
//! sequence of operations read from a script (or interactively from stdin):
//! `poweron`, `open`, `close`, `read`, `write`, `seek`, `poweroff` are all
//! first-class commands per §6's external interface table, so a script
//! controls the power cycle explicitly rather than the binary hiding it.
//! File state never survives past a `poweroff` (the driver's own model), so
//! there is no pretense of a CLI-level filesystem that outlives one script.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead};
use std::net::TcpStream;

use anyhow::{bail, Context};
use cartfs::{CartError, DriverConfig, FileHandle};
use clap::Parser;
use log::{error, info};

#[derive(Parser)]
#[command(about = "Command-line client for the cartfs driver")]
struct Opts {
    /// Load driver settings from a TOML file (see `DriverConfig`); any of the
    /// flags below that are also given override the loaded value.
    #[arg(long)]
    config: Option<String>,

    /// Controller host.
    #[arg(long)]
    host: Option<String>,

    /// Controller port.
    #[arg(long)]
    port: Option<u16>,

    /// Number of cartridges to zero on poweron.
    #[arg(long)]
    cartridges: Option<u16>,

    /// Frame cache capacity. `0` disables the cache.
    #[arg(long)]
    cache_frames: Option<usize>,

    /// Read commands from this file instead of stdin, one per line.
    #[arg(long)]
    script: Option<String>,
}

impl Opts {
    fn driver_config(&self) -> anyhow::Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => {
                DriverConfig::from_toml_file(path).with_context(|| format!("loading {path}"))?
            }
            None => DriverConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(cartridges) = self.cartridges {
            config.max_cartridges = cartridges;
        }
        if let Some(cache_frames) = self.cache_frames {
            config.cache_frames = cache_frames;
        }
        Ok(config)
    }
}

/// One line of a `cartctl` script. Parsed with clap so the grammar matches
/// the driver's public API one-for-one: `poweron`, `poweroff`, `open`,
/// `close`, `read`, `write`, `seek`, plus `quit` to end the session early.
#[derive(Parser)]
#[command(no_binary_name = true)]
enum Op {
    /// Initialize memory, zero every cartridge, and enable the file table.
    Poweron,
    /// Tear the driver down; any open handles become invalid.
    Poweroff,
    /// Open (or reopen) `path`, binding it to a local alias for this session.
    Open { path: String },
    /// Close the file bound to `path`.
    Close { path: String },
    /// Read `count` bytes from `path` at the current cursor and print them.
    Read { path: String, count: usize },
    /// Write `data` to `path` at the current cursor.
    Write { path: String, data: String },
    /// Move `path`'s cursor to absolute offset `loc`.
    Seek { path: String, loc: u32 },
    /// End the session (equivalent to reaching end of script).
    Quit,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    let config = opts.driver_config()?;

    info!("cartctl: connecting to {}", config.addr());
    let stream = TcpStream::connect(config.addr())
        .with_context(|| format!("connecting to cart-sim at {}", config.addr()))?;
    let mut driver = cartfs::Driver::new(cartfs::BusTransport::from_stream(stream), &config)?;

    let run_result = run_session(&mut driver, opts.script.as_deref());

    if driver.is_powered_on() {
        if let Err(e) = driver.poweroff() {
            error!("cartctl: poweroff failed: {e}");
        }
    }

    run_result
}

fn run_session<S: io::Read + io::Write>(
    driver: &mut cartfs::Driver<S>,
    script: Option<&str>,
) -> anyhow::Result<()> {
    let mut handles: HashMap<String, FileHandle> = HashMap::new();

    let lines: Box<dyn Iterator<Item = io::Result<String>>> = match script {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading script {path}"))?;
            Box::new(contents.lines().map(String::from).map(Ok).collect::<Vec<_>>().into_iter())
        }
        None => Box::new(io::stdin().lock().lines()),
    };

    for line in lines {
        let line = line.context("reading command")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let words = line.split_whitespace();
        let op = match Op::try_parse_from(words) {
            Ok(op) => op,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        if matches!(op, Op::Quit) {
            break;
        }
        if let Err(e) = apply(driver, &mut handles, op) {
            error!("cartctl: {e}");
        }
    }

    Ok(())
}

fn handle_of(handles: &HashMap<String, FileHandle>, path: &str) -> anyhow::Result<FileHandle> {
    handles
        .get(path)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("{path} is not open in this session"))
}

fn apply<S: io::Read + io::Write>(
    driver: &mut cartfs::Driver<S>,
    handles: &mut HashMap<String, FileHandle>,
    op: Op,
) -> anyhow::Result<()> {
    match op {
        Op::Poweron => {
            driver.poweron()?;
            println!("powered on");
        }
        Op::Poweroff => {
            driver.poweroff()?;
            handles.clear();
            println!("powered off");
        }
        Op::Open { path } => {
            let fd = driver.open(&path)?;
            println!("opened {path} as fd {fd}");
            handles.insert(path, fd);
        }
        Op::Close { path } => {
            let fd = handle_of(handles, &path)?;
            driver.close(fd)?;
            handles.remove(&path);
            println!("closed {path}");
        }
        Op::Read { path, count } => {
            let fd = handle_of(handles, &path)?;
            let mut buf = vec![0u8; count];
            let n = driver.read(fd, &mut buf)?;
            buf.truncate(n);
            println!("{}", String::from_utf8_lossy(&buf));
        }
        Op::Write { path, data } => {
            let fd = handle_of(handles, &path)?;
            let n = driver.write(fd, data.as_bytes())?;
            println!("wrote {n} bytes to {path}");
        }
        Op::Seek { path, loc } => {
            let fd = handle_of(handles, &path)?;
            match driver.seek(fd, loc) {
                Ok(()) => println!("{path} cursor at {loc}"),
                Err(CartError::Bounds(msg)) => bail!("seek out of bounds: {msg}"),
                Err(e) => return Err(e.into()),
            }
        }
        Op::Quit => unreachable!("handled by the caller before dispatch"),
    }
    Ok(())
}
