// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Frame cache (C3): an LRU map from global frame id to a 1024-byte frame.
//!
//! Built on the `lru` crate's intrusive-list-backed map, the same way this
//! codebase's chain-sync bad-block cache wraps `lru::LruCache` rather than
//! threading prev/next pointers by hand.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::error::{CartError, Result};
use crate::transport::FRAME_SIZE;

pub type GlobalFrameId = u32;
pub type Frame = [u8; FRAME_SIZE];

pub struct FrameCache {
    max_frames: usize,
    enabled: bool,
    cache: Option<LruCache<GlobalFrameId, Frame>>,
}

impl Default for FrameCache {
    fn default() -> Self {
        Self {
            max_frames: crate::config::DEFAULT_CACHE_FRAMES,
            enabled: false,
            cache: None,
        }
    }
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity in frames. Must be called before [`Self::init`].
    /// `0` disables the cache: subsequent `get`/`put` become no-ops.
    pub fn configure(&mut self, max_frames: usize) -> Result<()> {
        if self.enabled {
            return Err(CartError::State("cache size must be set before init"));
        }
        self.max_frames = max_frames;
        Ok(())
    }

    /// Enable the cache. Fails if already enabled.
    pub fn init(&mut self) -> Result<()> {
        if self.enabled {
            return Err(CartError::State("cache already initialized"));
        }
        self.cache = NonZeroUsize::new(self.max_frames).map(LruCache::new);
        self.enabled = true;
        Ok(())
    }

    /// Disable and empty the cache. Fails if already disabled.
    pub fn close(&mut self) -> Result<()> {
        if !self.enabled {
            return Err(CartError::State("cache already closed"));
        }
        self.cache = None;
        self.enabled = false;
        Ok(())
    }

    /// Look up `id`, moving it to MRU on a hit.
    pub fn get(&mut self, id: GlobalFrameId) -> Option<Frame> {
        if !self.enabled {
            return None;
        }
        self.cache.as_mut()?.get(&id).copied()
    }

    /// Insert or overwrite `id`. Overwriting an existing entry does not
    /// count as an eviction; inserting past capacity evicts exactly one LRU
    /// entry.
    pub fn put(&mut self, id: GlobalFrameId, frame: Frame) {
        if !self.enabled {
            return;
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.put(id, frame);
        }
    }

    /// Drop `id` from the cache if present, without counting as an LRU touch
    /// for any other entry. Used when a frame's contents change by a path
    /// other than [`Self::put`] (`BZERO`), so a stale cached copy can never
    /// outlive the write that invalidated it.
    pub fn invalidate(&mut self, id: GlobalFrameId) {
        if let Some(cache) = self.cache.as_mut() {
            cache.pop(&id);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
