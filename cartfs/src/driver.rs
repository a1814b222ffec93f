// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! File I/O (C6) and the power lifecycle: the driver object that composes
//! the cartridge controller (C4, which itself owns the frame cache) with the
//! file table (C5) into the public read/write/seek/open/close surface.

use std::io::{Read, Write};

use crate::config::DriverConfig;
use crate::controller::{split_id, CartridgeController};
use crate::error::{CartError, FileHandle, Result};
use crate::file_table::FileTable;
use crate::transport::{BusTransport, FRAME_SIZE};

/// Owns every piece of driver state for one power cycle: the bus connection,
/// cartridge bookkeeping, frame cache, and open file table. Unlike the
/// module-scope globals of the distilled source, state lives on this struct
/// so a test can stand up as many independent drivers as it needs.
pub struct Driver<S> {
    controller: CartridgeController<S>,
    file_table: FileTable,
    max_cartridges: u16,
    powered_on: bool,
}

impl<S: Read + Write> Driver<S> {
    pub fn new(transport: BusTransport<S>, config: &DriverConfig) -> Result<Self> {
        let mut cache = crate::cache::FrameCache::new();
        cache.configure(config.cache_frames)?;
        let controller = CartridgeController::new(transport, cache, config.max_cartridges);
        Ok(Self {
            controller,
            file_table: FileTable::new(config.max_files),
            max_cartridges: config.max_cartridges,
            powered_on: false,
        })
    }

    pub fn is_powered_on(&self) -> bool {
        self.powered_on
    }

    /// Override the frame cache capacity. Must be called before `poweron`
    /// (i.e. before the cache is enabled); forwards the "already
    /// initialized" failure from the cache itself.
    pub fn set_cache_size(&mut self, max_frames: usize) -> Result<()> {
        self.controller.cache_mut().configure(max_frames)
    }

    fn require_powered_on(&self) -> Result<()> {
        if !self.powered_on {
            return Err(CartError::State("driver is not powered on"));
        }
        Ok(())
    }

    fn poweron_inner(&mut self) -> Result<()> {
        self.controller.init_memory()?;
        self.controller.cache_mut().init()?;
        for c in 0..self.max_cartridges {
            self.controller.zero_cartridge(c)?;
        }
        self.controller.load_cartridge(0)?;
        self.file_table.reset();
        Ok(())
    }

    /// Bring the driver up: initialize the memory subsystem, enable the
    /// cache, zero every cartridge, and leave cartridge 0 loaded. Any failure
    /// partway through releases whatever was already acquired.
    pub fn poweron(&mut self) -> Result<()> {
        if self.powered_on {
            return Err(CartError::State("already powered on"));
        }
        if let Err(e) = self.poweron_inner() {
            log::error!("cartfs: poweron failed, releasing partial state: {e}");
            if self.controller.cache_mut().is_enabled() {
                let _ = self.controller.cache_mut().close();
            }
            self.controller.close_transport();
            return Err(e);
        }
        self.powered_on = true;
        log::info!("cartfs: powered on ({} cartridges)", self.max_cartridges);
        Ok(())
    }

    pub fn poweroff(&mut self) -> Result<()> {
        if !self.powered_on {
            return Err(CartError::State("already powered off"));
        }
        if self.controller.cache_mut().is_enabled() {
            self.controller.cache_mut().close()?;
        }
        self.file_table.reset();
        self.powered_on = false;
        let result = self.controller.power_off();
        log::info!("cartfs: powered off");
        result
    }

    pub fn open(&mut self, path: &str) -> Result<FileHandle> {
        self.require_powered_on()?;
        self.file_table.open(path)
    }

    pub fn close(&mut self, fd: FileHandle) -> Result<()> {
        self.require_powered_on()?;
        self.file_table.close(fd)
    }

    /// Read up to `buf.len()` bytes starting at the cursor, clamped to the
    /// file's logical length. Returns the number of bytes actually read.
    pub fn read(&mut self, fd: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.require_powered_on()?;
        let entry = self.file_table.get_open_mut(fd)?;

        let remaining = entry.length.saturating_sub(entry.cursor_abs) as usize;
        let count = buf.len().min(remaining);

        let mut written = 0usize;
        while written < count {
            // A cursor resting at offset 1024 (set by a prior call that
            // ended exactly on a frame boundary) rolls onto the real
            // successor before this slice is read. More bytes remain only
            // because `cursor_abs < length`, so the chain invariant
            // guarantees that successor exists.
            if entry.cursor_offset as usize == FRAME_SIZE {
                let (cart, frame) = split_id(entry.cursor_frame);
                entry.cursor_frame = self
                    .controller
                    .cartridge(cart)
                    .next_of(frame)
                    .expect("chain invariant: more bytes remain only if a successor frame exists");
                entry.cursor_offset = 0;
            }

            let data = self.controller.read_frame(entry.cursor_frame)?;
            let off = entry.cursor_offset as usize;
            let slice_len = (FRAME_SIZE - off).min(count - written);
            buf[written..written + slice_len].copy_from_slice(&data[off..off + slice_len]);

            written += slice_len;
            entry.cursor_abs += slice_len as u32;
            entry.cursor_offset = (off + slice_len) as u16;
        }
        Ok(written)
    }

    /// Write `buf` starting at the cursor. Slices that land inside the
    /// existing extent are read-modify-written in place; slices past the
    /// current length extend the chain, allocating fresh frames as needed. A
    /// slice straddling the old length is split at the boundary so one call
    /// can mix both regimes.
    pub fn write(&mut self, fd: FileHandle, buf: &[u8]) -> Result<usize> {
        self.require_powered_on()?;
        let (entry, next_free_frame_id) = self.file_table.open_entry_and_allocator(fd)?;
        let count = buf.len();
        let mut written = 0usize;

        while written < count {
            // Roll off a fully-consumed frame before deciding this slice's
            // regime: reuse the existing successor if the chain already has
            // one (still inside the old extent), otherwise allocate a fresh
            // tail frame (genuinely extending past it).
            if entry.cursor_offset as usize == FRAME_SIZE {
                let (cart, frame) = split_id(entry.cursor_frame);
                entry.cursor_frame = match self.controller.cartridge(cart).next_of(frame) {
                    Some(next) => next,
                    None => {
                        let next_id = *next_free_frame_id;
                        let (next_cart, _) = split_id(next_id);
                        if next_cart >= self.controller.cartridge_count() {
                            return Err(CartError::Bounds(format!(
                                "cartridge storage exhausted: no frame left beyond the configured {} cartridges",
                                self.controller.cartridge_count()
                            )));
                        }
                        *next_free_frame_id += 1;
                        self.controller.cartridge_mut(cart).set_next(frame, next_id);
                        self.controller.cartridge_mut(next_cart).used_count += 1;
                        next_id
                    }
                };
                entry.cursor_offset = 0;
            }

            let (cart, frame) = split_id(entry.cursor_frame);
            let off = entry.cursor_offset as usize;
            let space = FRAME_SIZE - off;
            let remaining = count - written;

            if entry.cursor_abs < entry.length {
                // Overwrite: bounded by both frame space and the existing extent.
                let extent_left = (entry.length - entry.cursor_abs) as usize;
                let slice_len = space.min(remaining).min(extent_left);

                let mut data = self.controller.read_frame(entry.cursor_frame)?;
                data[off..off + slice_len].copy_from_slice(&buf[written..written + slice_len]);
                self.controller.write_frame(entry.cursor_frame, &data)?;

                written += slice_len;
                entry.cursor_abs += slice_len as u32;
                entry.cursor_offset = (off + slice_len) as u16;
            } else {
                // Extend: fill the tail frame; a brand-new frame starts zeroed
                // rather than paying for a bus read of its (irrelevant) contents.
                let slice_len = space.min(remaining);
                let mut data = if off == 0 {
                    [0u8; FRAME_SIZE]
                } else {
                    self.controller.read_frame(entry.cursor_frame)?
                };
                data[off..off + slice_len].copy_from_slice(&buf[written..written + slice_len]);
                self.controller.write_frame(entry.cursor_frame, &data)?;

                let new_used = off + slice_len;
                self.controller.cartridge_mut(cart).set_frame_used(frame, new_used as u16);

                written += slice_len;
                entry.length += slice_len as u32;
                entry.cursor_abs += slice_len as u32;
                entry.cursor_offset = new_used as u16;
            }
        }
        Ok(written)
    }

    /// Reposition the cursor to absolute byte offset `loc`, walking the
    /// chain from `start`. `loc` may equal `length` (append position) but
    /// not exceed it.
    pub fn seek(&mut self, fd: FileHandle, loc: u32) -> Result<()> {
        self.require_powered_on()?;
        let entry = self.file_table.get_open_mut(fd)?;
        if loc > entry.length {
            return Err(CartError::Bounds(format!(
                "seek target {loc} exceeds file length {}",
                entry.length
            )));
        }

        // Landing exactly on a frame-size multiple at end-of-file has no
        // real successor frame to address; rest at offset 1024 of the last
        // real frame instead of overshooting the chain by one hop.
        let at_frame_aligned_eof = loc == entry.length && loc > 0 && loc % FRAME_SIZE as u32 == 0;
        let (hops, offset) = if at_frame_aligned_eof {
            (loc / FRAME_SIZE as u32 - 1, FRAME_SIZE as u32)
        } else {
            (loc / FRAME_SIZE as u32, loc % FRAME_SIZE as u32)
        };

        let mut cur = entry.start;
        for _ in 0..hops {
            let (cart, frame) = split_id(cur);
            cur = self
                .controller
                .cartridge(cart)
                .next_of(frame)
                .expect("chain invariant: loc <= length implies enough successors");
        }
        entry.cursor_frame = cur;
        entry.cursor_offset = offset as u16;
        entry.cursor_abs = loc;
        Ok(())
    }

    /// Global frame id of the head of `fd`'s chain, exposed for tests and
    /// tooling that want to inspect chain shape directly.
    pub fn chain_start(&self, fd: FileHandle) -> Result<u32> {
        Ok(self.file_table.get_open(fd)?.start)
    }

    pub fn file_length(&self, fd: FileHandle) -> Result<u32> {
        Ok(self.file_table.get_open(fd)?.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_driver;

    #[test]
    fn s1_write_then_read_back() {
        let mut d = test_driver(2);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();
        assert_eq!(d.write(fd, b"hello").unwrap(), 5);
        d.seek(fd, 0).unwrap();
        let mut out = [0u8; 5];
        assert_eq!(d.read(fd, &mut out).unwrap(), 5);
        assert_eq!(&out, b"hello");
        d.close(fd).unwrap();
    }

    #[test]
    fn s2_write_spans_exactly_two_frames() {
        let mut d = test_driver(2);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();
        let payload = vec![b'x'; 2048];
        assert_eq!(d.write(fd, &payload).unwrap(), 2048);
        d.seek(fd, 0).unwrap();
        let mut out = vec![0u8; 2048];
        assert_eq!(d.read(fd, &mut out).unwrap(), 2048);
        assert_eq!(out, payload);

        let start = d.chain_start(fd).unwrap();
        let (cart, frame) = split_id(start);
        let next = d.controller.cartridge(cart).next_of(frame).unwrap();
        assert!(d.controller.cartridge(split_id(next).0).next_of(split_id(next).1).is_none());
    }

    #[test]
    fn s3_overwrite_inside_extent_leaves_length_unchanged() {
        let mut d = test_driver(2);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();
        d.write(fd, b"ABCDEFGH").unwrap();
        d.seek(fd, 2).unwrap();
        d.write(fd, b"**").unwrap();
        d.seek(fd, 0).unwrap();
        let mut out = [0u8; 8];
        d.read(fd, &mut out).unwrap();
        assert_eq!(&out, b"AB**EFGH");
        assert_eq!(d.file_length(fd).unwrap(), 8);
    }

    #[test]
    fn s4_reopen_starts_cursor_at_zero() {
        let mut d = test_driver(2);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();
        d.write(fd, b"xxxxx").unwrap();
        d.close(fd).unwrap();
        let fd2 = d.open("a").unwrap();
        let mut out = [0u8; 5];
        assert_eq!(d.read(fd2, &mut out).unwrap(), 5);
        assert_eq!(&out, b"xxxxx");
    }

    #[test]
    fn read_clamps_to_length() {
        let mut d = test_driver(2);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();
        d.write(fd, b"hi").unwrap();
        d.seek(fd, 0).unwrap();
        let mut out = [0u8; 100];
        assert_eq!(d.read(fd, &mut out).unwrap(), 2);
    }

    #[test]
    fn seek_past_length_fails() {
        let mut d = test_driver(2);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();
        d.write(fd, b"hi").unwrap();
        assert!(d.seek(fd, 100).is_err());
    }

    #[test]
    fn double_poweron_fails() {
        let mut d = test_driver(1);
        d.poweron().unwrap();
        assert!(d.poweron().is_err());
    }

    #[test]
    fn io_before_poweron_fails() {
        let mut d = test_driver(1);
        assert!(d.open("a").is_err());
    }

    #[test]
    fn poweroff_then_poweron_gives_a_clean_chain_allocator() {
        let mut d = test_driver(1);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();
        let first_start = d.chain_start(fd).unwrap();
        d.close(fd).unwrap();
        d.poweroff().unwrap();

        d.poweron().unwrap();
        let fd2 = d.open("a").unwrap();
        assert_eq!(d.chain_start(fd2).unwrap(), first_start, "allocator restarts at 0 each power cycle");
    }

    #[test]
    fn chain_terminates_after_ceil_length_over_1024_hops_for_varied_sizes() {
        // Covers invariant 3 (§8): walking a file's chain from `start` across
        // `ceil(length/1024)` hops always lands on `None`, for a spread of
        // sizes that straddle frame boundaries on both sides.
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut d = test_driver(4);
        d.poweron().unwrap();

        for i in 0..8 {
            let path = format!("f{i}");
            let fd = d.open(&path).unwrap();
            let len = rng.gen_range(1..=5000);
            let payload = vec![b'y'; len];
            d.write(fd, &payload).unwrap();

            let expected_hops = (len as u32 + FRAME_SIZE as u32 - 1) / FRAME_SIZE as u32;
            let mut cur = d.chain_start(fd).unwrap();
            let mut hops = 0u32;
            loop {
                let (cart, frame) = split_id(cur);
                match d.controller.cartridge(cart).next_of(frame) {
                    Some(next) => {
                        cur = next;
                        hops += 1;
                    }
                    None => break,
                }
            }
            assert_eq!(hops, expected_hops - 1, "chain for length {len} has the wrong hop count");
            d.close(fd).unwrap();
        }
    }

    #[test]
    fn length_after_write_is_max_of_old_length_and_new_cursor() {
        // Covers invariant 4 (§8).
        let mut d = test_driver(2);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();

        d.write(fd, b"0123456789").unwrap();
        assert_eq!(d.file_length(fd).unwrap(), 10);

        d.seek(fd, 3).unwrap();
        d.write(fd, b"ab").unwrap();
        assert_eq!(d.file_length(fd).unwrap(), 10, "overwrite inside the extent must not shrink length");

        d.seek(fd, 10).unwrap();
        d.write(fd, b"xyz").unwrap();
        assert_eq!(d.file_length(fd).unwrap(), 13);
    }

    #[test]
    fn read_matches_last_write_regardless_of_cache_size() {
        // Covers invariant 6 (§8): the same write/read sequence must observe
        // identical bytes whether the cache is disabled, tiny, or generous.
        for cache_frames in [0usize, 1, 128] {
            let config = DriverConfig {
                max_cartridges: 2,
                cache_frames,
                ..DriverConfig::default()
            };
            let mut d = Driver::new(crate::test_support::test_transport(2), &config).unwrap();
            d.poweron().unwrap();
            let fd = d.open("a").unwrap();
            let payload = vec![b'm'; 3000];
            d.write(fd, &payload).unwrap();
            d.seek(fd, 0).unwrap();
            let mut out = vec![0u8; 3000];
            d.read(fd, &mut out).unwrap();
            assert_eq!(out, payload, "cache_frames={cache_frames}");
        }
    }

    #[test]
    fn write_past_configured_cartridge_capacity_errors_instead_of_panicking() {
        // One cartridge holds 1024 frames. Filling all of them and then
        // writing one byte more must surface a bounds error, not index the
        // controller's cartridge list out of range.
        let mut d = test_driver(1);
        d.poweron().unwrap();
        let fd = d.open("a").unwrap();

        let full = vec![b'f'; FRAME_SIZE * 1024];
        d.write(fd, &full).unwrap();

        assert!(d.write(fd, b"x").is_err(), "write beyond cartridge capacity must error");
    }

    #[test]
    fn poweron_issues_one_ldcart_bzero_pair_per_cartridge_then_a_final_ldcart_s6() {
        // S6 (§8): `poweron` with N cartridges must LDCART+BZERO each of them
        // in order, then LDCART the one it leaves loaded (cartridge 0).
        use crate::protocol::Opcode;
        use crate::test_support::test_driver_tracing;

        let (mut d, trace) = test_driver_tracing(3);
        d.poweron().unwrap();

        let calls = trace.borrow().clone();
        let expected = vec![
            (Opcode::Initms, 0),
            (Opcode::Ldcart, 0),
            (Opcode::Bzero, 0),
            (Opcode::Ldcart, 1),
            (Opcode::Bzero, 1),
            (Opcode::Ldcart, 2),
            (Opcode::Bzero, 2),
            (Opcode::Ldcart, 0),
        ];
        assert_eq!(calls, expected);
    }
}
