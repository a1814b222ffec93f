// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Bus transport (C2): a single synchronous request/response stream to the
//! controller. Generic over any `Read + Write` so the production `TcpStream`
//! path and an in-process duplex used by tests share one implementation.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::error::{CartError, Result};

pub const FRAME_SIZE: usize = 1024;

/// Connects (or re-connects) the underlying stream on demand.
pub trait Dial<S> {
    fn dial(&mut self) -> std::io::Result<S>;
}

impl<S, F> Dial<S> for F
where
    F: FnMut() -> std::io::Result<S>,
{
    fn dial(&mut self) -> std::io::Result<S> {
        (self)()
    }
}

/// Single synchronous connection to the cartridge controller. Owns at most
/// one live stream; establishes it lazily on the first request and tears it
/// down on [`BusTransport::close`].
pub struct BusTransport<S> {
    stream: Option<S>,
    dial: Box<dyn Dial<S> + Send>,
}

impl<S: Read + Write> BusTransport<S> {
    pub fn new(dial: impl Dial<S> + Send + 'static) -> Self {
        Self {
            stream: None,
            dial: Box::new(dial),
        }
    }

    /// Wrap an already-connected stream (used by tests with an in-memory duplex).
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: Some(stream),
            dial: Box::new(|| {
                Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "transport stream closed and has no dialer to reconnect",
                ))
            }),
        }
    }

    fn ensure_connected(&mut self) -> Result<&mut S> {
        if self.stream.is_none() {
            log::info!("cartfs: establishing bus connection");
            let s = self.dial.dial()?;
            self.stream = Some(s);
        }
        Ok(self.stream.as_mut().expect("just connected"))
    }

    /// Send `reg`, optionally followed by a 1024-byte payload (`WRFRME`), and
    /// read back a response register, optionally followed by a 1024-byte
    /// payload (`RDFRME`). Any short read/write is an `ETransport` error.
    pub fn request(
        &mut self,
        reg: u64,
        payload_out: Option<&[u8; FRAME_SIZE]>,
        want_payload_in: bool,
    ) -> Result<(u64, Option<[u8; FRAME_SIZE]>)> {
        let stream = self.ensure_connected()?;

        stream.write_all(&reg.to_be_bytes()).map_err(CartError::from)?;
        if let Some(payload) = payload_out {
            stream.write_all(payload).map_err(CartError::from)?;
        }

        let mut resp_bytes = [0u8; 8];
        stream.read_exact(&mut resp_bytes).map_err(CartError::from)?;
        let resp = u64::from_be_bytes(resp_bytes);

        let payload_in = if want_payload_in {
            let mut buf = [0u8; FRAME_SIZE];
            stream.read_exact(&mut buf).map_err(CartError::from)?;
            Some(buf)
        } else {
            None
        };

        Ok((resp, payload_in))
    }

    /// Tear down the connection. Safe to call when already disconnected.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log::info!("cartfs: bus connection closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Build a lazily-dialing TCP transport for `addr`. The connection is opened
/// on the first [`BusTransport::request`] call, matching the reference
/// client's "dial only when there is no open socket" behavior.
pub fn tcp_transport(addr: impl ToSocketAddrs + Send + Clone + 'static) -> BusTransport<TcpStream> {
    BusTransport::new(move || TcpStream::connect(addr.clone()))
}
