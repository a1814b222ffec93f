// Copyright 2024 cartfs contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! A `Driver` handle safe to share across callers: one `parking_lot::Mutex`
//! guards the whole call surface, the same way this codebase's chain-sync
//! bad-block cache wraps a single lock around its `LruCache` rather than
//! synchronizing field-by-field.
//!
//! The driver itself assumes single-threaded, run-to-completion calls (bus
//! requests are strict request/response); this wrapper is what turns that
//! into something a multi-threaded embedding application can hold one
//! instance of and call from any thread, serializing access rather than
//! requiring external coordination.

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::DriverConfig;
use crate::driver::Driver;
use crate::error::{FileHandle, Result};
use crate::transport::BusTransport;

/// A cloneable, lock-guarded handle to a single `Driver`. Every method takes
/// `&self` and serializes on the inner mutex; callers never see a `Driver`
/// directly.
#[derive(Clone)]
pub struct SharedDriver<S> {
    inner: Arc<Mutex<Driver<S>>>,
}

impl<S: Read + Write> SharedDriver<S> {
    pub fn new(transport: BusTransport<S>, config: &DriverConfig) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Driver::new(transport, config)?)),
        })
    }

    pub fn is_powered_on(&self) -> bool {
        self.inner.lock().is_powered_on()
    }

    pub fn set_cache_size(&self, max_frames: usize) -> Result<()> {
        self.inner.lock().set_cache_size(max_frames)
    }

    pub fn poweron(&self) -> Result<()> {
        self.inner.lock().poweron()
    }

    pub fn poweroff(&self) -> Result<()> {
        self.inner.lock().poweroff()
    }

    pub fn open(&self, path: &str) -> Result<FileHandle> {
        self.inner.lock().open(path)
    }

    pub fn close(&self, fd: FileHandle) -> Result<()> {
        self.inner.lock().close(fd)
    }

    pub fn read(&self, fd: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().read(fd, buf)
    }

    pub fn write(&self, fd: FileHandle, buf: &[u8]) -> Result<usize> {
        self.inner.lock().write(fd, buf)
    }

    pub fn seek(&self, fd: FileHandle, loc: u32) -> Result<()> {
        self.inner.lock().seek(fd, loc)
    }

    pub fn chain_start(&self, fd: FileHandle) -> Result<u32> {
        self.inner.lock().chain_start(fd)
    }

    pub fn file_length(&self, fd: FileHandle) -> Result<u32> {
        self.inner.lock().file_length(fd)
    }
}
