// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! A block-oriented file driver over a remote cartridge memory service.
//!
//! A cartridge is a fixed array of 1024 frames; a frame is exactly 1024
//! bytes. Conventional file operations (`open`/`close`/`read`/`write`/`seek`)
//! are presented over this block device by maintaining a per-file chain of
//! frames, multiplexing accesses through a single bus via a packed 64-bit
//! register protocol, and interposing an LRU frame cache in front of the bus.
//!
//! ```text
//! application -> Driver -> (file table, frame cache) -> controller proxy -> bus transport -> controller
//! ```
//!
//! [`Driver`] is generic over the transport stream so production code can
//! dial a real `TcpStream` while tests drive the same code path against an
//! in-process duplex.

pub mod cache;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod file_table;
pub mod protocol;
pub mod shared;
#[cfg(test)]
mod test_support;
pub mod transport;

pub use cache::FrameCache;
pub use config::DriverConfig;
pub use controller::{CartridgeController, CartridgeState};
pub use driver::Driver;
pub use error::{CartError, FileHandle, Result};
pub use shared::SharedDriver;
pub use transport::{tcp_transport, BusTransport};

use std::net::TcpStream;

/// Build a `Driver` that dials `config.addr()` lazily over TCP, the
/// production entry point for binaries (`cartctl`, embedding applications)
/// that don't need to swap in a test transport.
pub fn connect(config: DriverConfig) -> Result<Driver<TcpStream>> {
    let transport = tcp_transport(config.addr());
    Driver::new(transport, &config)
}
