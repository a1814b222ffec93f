// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The packed 64-bit bus register (C1): pure pack/unpack, no I/O.
//!
//! Field layout, MSB first:
//!
//! ```text
//! 63      56 55      48 47  46           31 30           15 14            0
//! +--------+--------+--+--------------+--------------+----------------+
//! |  KY1   |  KY2   |RT|     CT1      |     FM1      |   reserved     |
//! +--------+--------+--+--------------+--------------+----------------+
//! ```

use crate::error::CartError;

const KY1_SHIFT: u32 = 56;
const KY2_SHIFT: u32 = 48;
const RT1_SHIFT: u32 = 47;
const CT1_SHIFT: u32 = 31;
const FM1_SHIFT: u32 = 15;

/// Bus opcodes. Values are the canonical KY1 encoding; any reimplementation
/// that keeps the six codes distinct and stable is conformant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Initms = 0,
    Ldcart = 1,
    Bzero = 2,
    Rdfrme = 3,
    Wrfrme = 4,
    Powoff = 5,
}

impl Opcode {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Initms),
            1 => Some(Self::Ldcart),
            2 => Some(Self::Bzero),
            3 => Some(Self::Rdfrme),
            4 => Some(Self::Wrfrme),
            5 => Some(Self::Powoff),
            _ => None,
        }
    }
}

/// A decoded bus register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub ky1: u8,
    pub ky2: u8,
    pub rt1: u8,
    pub ct1: u16,
    pub fm1: u16,
}

impl Register {
    /// Look up the opcode carried in `ky1`. `None` if the value names no
    /// opcode this driver understands, which the caller should treat as
    /// `EProtocol`.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.ky1)
    }

    pub fn is_ok(&self) -> bool {
        self.rt1 == 0
    }
}

/// Pack the five register fields into a 64-bit word. Reserved bits are
/// always zero.
pub fn pack(ky1: u8, ky2: u8, rt1: u8, ct1: u16, fm1: u16) -> u64 {
    (u64::from(ky1) << KY1_SHIFT)
        | (u64::from(ky2) << KY2_SHIFT)
        | (u64::from(rt1 & 1) << RT1_SHIFT)
        | (u64::from(ct1) << CT1_SHIFT)
        | (u64::from(fm1) << FM1_SHIFT)
}

/// Pack a request register for `opcode`, addressed at cartridge/frame.
pub fn pack_request(opcode: Opcode, ct1: u16, fm1: u16) -> u64 {
    pack(opcode as u8, 0, 0, ct1, fm1)
}

/// Unpack a 64-bit register into its five fields. Reserved bits are ignored.
pub fn unpack(reg: u64) -> Register {
    Register {
        ky1: (reg >> KY1_SHIFT) as u8,
        ky2: (reg >> KY2_SHIFT) as u8,
        rt1: ((reg >> RT1_SHIFT) & 0x1) as u8,
        ct1: ((reg >> CT1_SHIFT) & 0xFFFF) as u16,
        fm1: ((reg >> FM1_SHIFT) & 0xFFFF) as u16,
    }
}

/// Unpack and require a recognized opcode, surfacing `EProtocol` otherwise.
pub fn unpack_checked(reg: u64) -> Result<Register, CartError> {
    let r = unpack(reg);
    if r.opcode().is_none() {
        return Err(CartError::Protocol(format!("unrecognized opcode {}", r.ky1)));
    }
    Ok(r)
}
