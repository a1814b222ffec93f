// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Error kinds surfaced by the driver.

use thiserror::Error;

/// A file handle, as returned by [`crate::Driver::open`].
pub type FileHandle = i32;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("operation invalid for current power/cache/file state: {0}")]
    State(&'static str),

    #[error("unknown or closed file handle {0}")]
    BadHandle(FileHandle),

    #[error("argument out of bounds: {0}")]
    Bounds(String),

    #[error("file table is full (capacity reached)")]
    TableFull,

    #[error("controller returned a nonzero return code for opcode {opcode:?} (cartridge {cart}, frame {frame})")]
    Bus {
        opcode: crate::protocol::Opcode,
        cart: u16,
        frame: u16,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed response from controller: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, CartError>;
