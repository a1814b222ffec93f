// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! An in-process stand-in for the bus, shared by every module's tests so the
//! full power lifecycle and file I/O path can be exercised without a real
//! socket.

#![cfg(test)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::Rc;

use crate::config::DriverConfig;
use crate::driver::Driver;
use crate::protocol::{pack, unpack, Opcode};
use crate::transport::{BusTransport, FRAME_SIZE};

fn opcode_from(v: u8) -> Option<Opcode> {
    match v {
        0 => Some(Opcode::Initms),
        1 => Some(Opcode::Ldcart),
        2 => Some(Opcode::Bzero),
        3 => Some(Opcode::Rdfrme),
        4 => Some(Opcode::Wrfrme),
        5 => Some(Opcode::Powoff),
        _ => None,
    }
}

/// Answers the register/frame protocol against plain byte-addressed backing
/// storage. Processes one full request as soon as enough bytes have been
/// written, and queues the response for the following read.
pub(crate) struct Loopback {
    carts: Vec<[[u8; FRAME_SIZE]; 1024]>,
    current: Option<u16>,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
}

impl Loopback {
    pub(crate) fn new(cartridges: u16) -> Self {
        Self {
            carts: vec![[[0u8; FRAME_SIZE]; 1024]; cartridges as usize],
            current: None,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
        }
    }

    fn process(&mut self) {
        loop {
            if self.inbox.len() < 8 {
                return;
            }
            let Some(opcode) = opcode_from(self.inbox[0]) else {
                return;
            };
            let request_payload_len = if opcode == Opcode::Wrfrme { FRAME_SIZE } else { 0 };
            if self.inbox.len() < 8 + request_payload_len {
                return;
            }

            let mut reg_bytes = [0u8; 8];
            reg_bytes.copy_from_slice(&self.inbox[0..8]);
            let reg = unpack(u64::from_be_bytes(reg_bytes));
            let request_payload = (request_payload_len > 0).then(|| self.inbox[8..8 + FRAME_SIZE].to_vec());
            self.inbox.drain(0..8 + request_payload_len);

            let response_payload = match opcode {
                Opcode::Ldcart => {
                    self.current = Some(reg.ct1);
                    None
                }
                Opcode::Bzero => {
                    let c = self.current.expect("LDCART precedes BZERO");
                    self.carts[c as usize] = [[0u8; FRAME_SIZE]; 1024];
                    None
                }
                Opcode::Rdfrme => {
                    let c = self.current.expect("LDCART precedes RDFRME");
                    Some(self.carts[c as usize][reg.fm1 as usize].to_vec())
                }
                Opcode::Wrfrme => {
                    let c = self.current.expect("LDCART precedes WRFRME");
                    let mut buf = [0u8; FRAME_SIZE];
                    buf.copy_from_slice(&request_payload.expect("WRFRME carries a request payload"));
                    self.carts[c as usize][reg.fm1 as usize] = buf;
                    None
                }
                Opcode::Initms | Opcode::Powoff => None,
            };

            let resp = pack(opcode as u8, 0, 0, reg.ct1, reg.fm1);
            self.outbox.extend(resp.to_be_bytes());
            if let Some(p) = response_payload {
                self.outbox.extend(p);
            }
        }
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inbox.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.outbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.outbox.pop_front().expect("checked length above");
        }
        Ok(n)
    }
}

pub(crate) fn test_transport(cartridges: u16) -> BusTransport<Loopback> {
    BusTransport::from_stream(Loopback::new(cartridges))
}

pub(crate) fn test_driver(cartridges: u16) -> Driver<Loopback> {
    let config = DriverConfig {
        max_cartridges: cartridges,
        ..DriverConfig::default()
    };
    Driver::new(test_transport(cartridges), &config).unwrap()
}

/// The recorded `(opcode, ct1)` pair for every request a [`TracingLoopback`]
/// has forwarded, in the order it was sent.
pub(crate) type BusTrace = Rc<RefCell<Vec<(Opcode, u16)>>>;

/// Wraps [`Loopback`] and records every request register's opcode and
/// cartridge id before forwarding it, so a test can assert the shape of the
/// bus traffic a call produced rather than only its outcome.
pub(crate) struct TracingLoopback {
    inner: Loopback,
    trace: BusTrace,
}

impl TracingLoopback {
    fn new(cartridges: u16, trace: BusTrace) -> Self {
        Self {
            inner: Loopback::new(cartridges),
            trace,
        }
    }
}

impl Write for TracingLoopback {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // A request register is always written whole in one 8-byte call,
        // separate from any WRFRME payload, so this is never split.
        if buf.len() == 8 {
            let mut reg_bytes = [0u8; 8];
            reg_bytes.copy_from_slice(buf);
            let reg = unpack(u64::from_be_bytes(reg_bytes));
            if let Some(opcode) = opcode_from(reg.ky1) {
                self.trace.borrow_mut().push((opcode, reg.ct1));
            }
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Read for TracingLoopback {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

pub(crate) fn test_driver_tracing(cartridges: u16) -> (Driver<TracingLoopback>, BusTrace) {
    let trace: BusTrace = Rc::new(RefCell::new(Vec::new()));
    let transport = BusTransport::from_stream(TracingLoopback::new(cartridges, trace.clone()));
    let config = DriverConfig {
        max_cartridges: cartridges,
        ..DriverConfig::default()
    };
    (Driver::new(transport, &config).unwrap(), trace)
}
