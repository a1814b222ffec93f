// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory cartridge state and request handling, the controller side of
//! the §3/§4.2 wire protocol the driver speaks. Mirrors the controller's own
//! bookkeeping (current cartridge, frame bytes) without any of the driver's
//! caching or chain logic; the simulator just answers whatever the driver
//! asks for.

use std::io::{Read, Write};

use cartfs::protocol::{pack, unpack_checked, Opcode};
use cartfs::transport::FRAME_SIZE;
use log::{debug, info, warn};

type Frame = [u8; FRAME_SIZE];

struct Cartridge {
    frames: Vec<Frame>,
}

impl Cartridge {
    fn new() -> Self {
        Self {
            frames: vec![[0u8; FRAME_SIZE]; 1024],
        }
    }

    fn zero(&mut self) {
        self.frames.iter_mut().for_each(|f| *f = [0u8; FRAME_SIZE]);
    }
}

/// Holds every cartridge's frame contents and which one is currently loaded.
pub struct ControllerSim {
    cartridges: Vec<Cartridge>,
    current: Option<u16>,
    initialized: bool,
}

impl ControllerSim {
    pub fn new(cartridge_count: u16) -> Self {
        Self {
            cartridges: (0..cartridge_count).map(|_| Cartridge::new()).collect(),
            current: None,
            initialized: false,
        }
    }

    /// Serve requests on one connection until the peer disconnects or sends
    /// a malformed register.
    pub fn serve(&mut self, mut stream: impl Read + Write) {
        loop {
            let mut reg_bytes = [0u8; 8];
            if stream.read_exact(&mut reg_bytes).is_err() {
                info!("cart-sim: connection closed");
                return;
            }
            let reg = match unpack_checked(u64::from_be_bytes(reg_bytes)) {
                Ok(r) => r,
                Err(e) => {
                    warn!("cart-sim: malformed register, dropping connection: {e}");
                    return;
                }
            };
            let opcode = reg.opcode().expect("unpack_checked rejects unknown opcodes");

            let mut request_payload: Option<Frame> = None;
            if opcode == Opcode::Wrfrme {
                let mut buf = [0u8; FRAME_SIZE];
                if stream.read_exact(&mut buf).is_err() {
                    warn!("cart-sim: short WRFRME payload, dropping connection");
                    return;
                }
                request_payload = Some(buf);
            }

            debug!("cart-sim: {opcode:?}(cart={}, frame={})", reg.ct1, reg.fm1);
            let (rt1, response_payload) = self.apply(opcode, reg.ct1, reg.fm1, request_payload);

            let resp = pack(opcode as u8, 0, rt1, reg.ct1, reg.fm1);
            if stream.write_all(&resp.to_be_bytes()).is_err() {
                warn!("cart-sim: failed to write response register, dropping connection");
                return;
            }
            if let Some(payload) = response_payload {
                if stream.write_all(&payload).is_err() {
                    warn!("cart-sim: failed to write response payload, dropping connection");
                    return;
                }
            }

            if opcode == Opcode::Powoff {
                info!("cart-sim: POWOFF received, closing connection");
                return;
            }
        }
    }

    /// Executes one request against cartridge state, returning `(rt1,
    /// response_payload)`. `rt1 != 0` models a controller-level failure;
    /// this reference implementation only ever returns 0.
    fn apply(
        &mut self,
        opcode: Opcode,
        ct1: u16,
        fm1: u16,
        request_payload: Option<Frame>,
    ) -> (u8, Option<Frame>) {
        match opcode {
            Opcode::Initms => {
                self.initialized = true;
                (0, None)
            }
            Opcode::Ldcart => {
                self.current = Some(ct1);
                (0, None)
            }
            Opcode::Bzero => {
                self.cartridges[ct1 as usize].zero();
                (0, None)
            }
            Opcode::Rdfrme => {
                let data = self.cartridges[ct1 as usize].frames[fm1 as usize];
                (0, Some(data))
            }
            Opcode::Wrfrme => {
                let data = request_payload.expect("WRFRME always carries a payload");
                self.cartridges[ct1 as usize].frames[fm1 as usize] = data;
                (0, None)
            }
            Opcode::Powoff => {
                self.current = None;
                (0, None)
            }
        }
    }
}
