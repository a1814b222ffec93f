// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Driver configuration: everything decided once, at `poweron` time,
//! loadable from a TOML string or file, `#[serde(default)]` throughout so a
//! partial config only overrides what it mentions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CartError, Result};

/// Frames per cartridge, fixed by the wire protocol and not configurable.
pub const FRAMES_PER_CARTRIDGE: u32 = 1024;

/// Maximum path length for a file identifier, per the reference header.
pub const MAX_PATH_LENGTH: usize = 128;

/// Default file table capacity, matching the reference header's
/// `CART_MAX_TOTAL_FILES`.
pub const DEFAULT_MAX_FILES: usize = 1024;

/// Default number of cartridges the driver zeroes on `poweron` (see
/// DESIGN.md for the reasoning behind this number).
pub const DEFAULT_MAX_CARTRIDGES: u16 = 64;

/// Default frame cache capacity when the embedding application never calls
/// `set_cache_size`.
pub const DEFAULT_CACHE_FRAMES: usize = 128;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    29_990
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Controller host.
    pub host: String,
    /// Controller port.
    pub port: u16,
    /// Connect/read timeout in milliseconds. `0` means "no timeout," the
    /// base protocol's default.
    pub timeout_ms: u64,
    /// Initial frame cache capacity (frames). `0` disables the cache.
    pub cache_frames: usize,
    /// Number of cartridges to zero on `poweron`.
    pub max_cartridges: u16,
    /// File table capacity.
    pub max_files: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: 0,
            cache_frames: DEFAULT_CACHE_FRAMES,
            max_cartridges: DEFAULT_MAX_CARTRIDGES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| CartError::Bounds(format!("invalid config: {e}")))
    }

    /// Load from a TOML file on disk, the way `cartctl --config` does.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CartError::Bounds(format!("reading config file: {e}")))?;
        Self::from_toml_str(&contents)
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
