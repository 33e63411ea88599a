// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RAII guard that holds a lock for the lifetime of the access and exposes
// the bytes of a mapped region.

use crate::error::{IpcError, Result};
use crate::mmap::MappedRegion;
use crate::mutex::Locker;

/// Locks `locker` on construction, unlocks on drop, and gives `read()` /
/// `write()` access to `region` in between.
pub struct ScopedAccess<'a, L: Locker + ?Sized> {
    region: &'a MappedRegion,
    locker: &'a L,
}

impl<'a, L: Locker + ?Sized> ScopedAccess<'a, L> {
    pub fn new(region: &'a MappedRegion, locker: &'a L) -> Result<Self> {
        locker.lock()?;
        Ok(Self { region, locker })
    }

    /// The whole mapped region.
    pub fn read(&self) -> &[u8] {
        self.region.data()
    }

    /// Copy `buf` to the start of the region.
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        self.write_at(0, buf)
    }

    /// Copy `buf` to `offset`. Fails with `InvalidLength` if it does not
    /// fit and with `InvalidFlags` on a read-only mapping.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<()> {
        if !self.region.mode().is_writable() {
            return Err(IpcError::InvalidFlags);
        }
        match offset.checked_add(buf.len()) {
            Some(end) if end <= self.region.size() => {}
            _ => return Err(IpcError::InvalidLength),
        }
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.region.as_mut_ptr().add(offset), buf.len());
        }
        Ok(())
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.region.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.region.as_mut_ptr()
    }

    pub fn size(&self) -> usize {
        self.region.size()
    }
}

impl<L: Locker + ?Sized> Drop for ScopedAccess<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.locker.unlock() {
            tracing::warn!(error = %e, "failed to release scoped access lock");
        }
    }
}
