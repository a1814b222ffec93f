// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Cartridge controller proxy (C4): issues packed bus ops and enforces the
//! "currently loaded cartridge" invariant in front of the frame cache.

use std::io::{Read, Write};

use crate::cache::{Frame, FrameCache, GlobalFrameId};
use crate::config::FRAMES_PER_CARTRIDGE;
use crate::error::{CartError, Result};
use crate::protocol::{pack_request, unpack_checked, Opcode, Register};
use crate::transport::BusTransport;

/// Per-cartridge bookkeeping: which frames hold data, and the chain
/// successor for each.
#[derive(Debug, Clone)]
pub struct CartridgeState {
    pub used_count: u32,
    f_used: Vec<u16>,
    next: Vec<Option<GlobalFrameId>>,
}

impl CartridgeState {
    fn new() -> Self {
        Self {
            used_count: 0,
            f_used: vec![0; FRAMES_PER_CARTRIDGE as usize],
            next: vec![None; FRAMES_PER_CARTRIDGE as usize],
        }
    }

    fn reset(&mut self) {
        self.used_count = 0;
        self.f_used.iter_mut().for_each(|u| *u = 0);
        self.next.iter_mut().for_each(|n| *n = None);
    }

    pub fn frame_used(&self, frame: u16) -> u16 {
        self.f_used[frame as usize]
    }

    pub fn next_of(&self, frame: u16) -> Option<GlobalFrameId> {
        self.next[frame as usize]
    }

    pub fn set_next(&mut self, frame: u16, next: GlobalFrameId) {
        self.next[frame as usize] = Some(next);
    }

    pub fn set_frame_used(&mut self, frame: u16, used: u16) {
        self.f_used[frame as usize] = used;
    }
}

/// Split a global frame id into `(cartridge, frame)`.
pub fn split_id(id: GlobalFrameId) -> (u16, u16) {
    ((id / FRAMES_PER_CARTRIDGE) as u16, (id % FRAMES_PER_CARTRIDGE) as u16)
}

/// Join a `(cartridge, frame)` pair into a global frame id.
pub fn join_id(cart: u16, frame: u16) -> GlobalFrameId {
    u32::from(cart) * FRAMES_PER_CARTRIDGE + u32::from(frame)
}

pub struct CartridgeController<S> {
    transport: BusTransport<S>,
    cache: FrameCache,
    current_cart: Option<u16>,
    carts: Vec<CartridgeState>,
}

impl<S: Read + Write> CartridgeController<S> {
    pub fn new(transport: BusTransport<S>, cache: FrameCache, cartridge_count: u16) -> Self {
        Self {
            transport,
            cache,
            current_cart: None,
            carts: (0..cartridge_count).map(|_| CartridgeState::new()).collect(),
        }
    }

    pub fn cache_mut(&mut self) -> &mut FrameCache {
        &mut self.cache
    }

    pub fn cartridge(&self, c: u16) -> &CartridgeState {
        &self.carts[c as usize]
    }

    pub fn cartridge_mut(&mut self, c: u16) -> &mut CartridgeState {
        &mut self.carts[c as usize]
    }

    pub fn cartridge_count(&self) -> u16 {
        self.carts.len() as u16
    }

    fn bus_op(
        &mut self,
        opcode: Opcode,
        ct1: u16,
        fm1: u16,
        payload_out: Option<&Frame>,
        want_payload_in: bool,
    ) -> Result<(Register, Option<Frame>)> {
        let req = pack_request(opcode, ct1, fm1);
        let (resp, payload) = self.transport.request(req, payload_out, want_payload_in)?;
        let reg = unpack_checked(resp)?;
        if !reg.is_ok() {
            log::error!(
                "cartfs: controller returned rt1={} for {:?}(cart={ct1}, frame={fm1})",
                reg.rt1,
                opcode
            );
            return Err(CartError::Bus {
                opcode,
                cart: ct1,
                frame: fm1,
            });
        }
        Ok((reg, payload))
    }

    /// `INITMS`. Fails if already initialized; callers are expected to
    /// invoke this exactly once per power cycle.
    pub fn init_memory(&mut self) -> Result<()> {
        self.bus_op(Opcode::Initms, 0, 0, None, false)?;
        Ok(())
    }

    /// Load cartridge `c`, a no-op (no bus traffic) if it is already loaded.
    pub fn load_cartridge(&mut self, c: u16) -> Result<()> {
        if self.current_cart == Some(c) {
            return Ok(());
        }
        self.bus_op(Opcode::Ldcart, c, 0, None, false)?;
        self.current_cart = Some(c);
        Ok(())
    }

    /// `BZERO` the currently-loaded cartridge and reset its bookkeeping. Any
    /// frame of this cartridge still resident in the cache is evicted first:
    /// `BZERO` changes the controller's copy without going through
    /// [`Self::write_frame`], so a cached entry would otherwise go stale
    /// (invariant 3, §3).
    pub fn zero_cartridge(&mut self, c: u16) -> Result<()> {
        self.load_cartridge(c)?;
        self.bus_op(Opcode::Bzero, c, 0, None, false)?;
        self.carts[c as usize].reset();
        for frame in 0..FRAMES_PER_CARTRIDGE as u16 {
            self.cache.invalidate(join_id(c, frame));
        }
        Ok(())
    }

    /// Read a frame, consulting the cache first. A frame with `fUsed == 0`
    /// returns a deterministically zero-filled frame rather than untouched
    /// memory.
    pub fn read_frame(&mut self, id: GlobalFrameId) -> Result<Frame> {
        let (cart, frame) = split_id(id);
        self.load_cartridge(cart)?;

        if let Some(cached) = self.cache.get(id) {
            return Ok(cached);
        }

        if self.carts[cart as usize].frame_used(frame) == 0 {
            return Ok([0u8; 1024]);
        }

        let (_, payload) = self.bus_op(Opcode::Rdfrme, cart, frame, None, true)?;
        let data = payload.expect("RDFRME always returns a payload");
        self.cache.put(id, data);
        Ok(data)
    }

    /// Write a frame and update the cache on success.
    pub fn write_frame(&mut self, id: GlobalFrameId, data: &Frame) -> Result<()> {
        let (cart, frame) = split_id(id);
        self.load_cartridge(cart)?;
        self.bus_op(Opcode::Wrfrme, cart, frame, Some(data), false)?;
        self.cache.put(id, *data);
        Ok(())
    }

    /// `POWOFF`, closing the transport afterward regardless of outcome.
    pub fn power_off(&mut self) -> Result<()> {
        let result = self.bus_op(Opcode::Powoff, 0, 0, None, false);
        self.transport.close();
        result.map(|_| ())
    }

    /// Tear down the bus connection without issuing `POWOFF`, for releasing
    /// a partially-initialized driver.
    pub fn close_transport(&mut self) {
        self.transport.close();
    }
}
