// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Mapped views of memory objects and files.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{IpcError, Result};
use crate::memory_object::Mappable;
use crate::platform;

pub use crate::platform::mmap_offset_multiple;

/// Access mode of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Shared, read-only.
    ReadOnly,
    /// Private, read-only.
    ReadPrivate,
    /// Shared, read-write: writes reach the backing object.
    ReadWrite,
    /// Private, read-write: writes stay in this process.
    CopyOnWrite,
}

impl MapMode {
    pub fn is_writable(self) -> bool {
        matches!(self, MapMode::ReadWrite | MapMode::CopyOnWrite)
    }
}

/// A mapped view of `len` bytes at `offset` of a [`Mappable`] object.
///
/// The OS mapping starts at `offset` rounded down to
/// [`mmap_offset_multiple`]; `data()` hides that adjustment. The mapping is
/// released on drop or by [`close`](Self::close).
#[derive(Debug)]
pub struct MappedRegion {
    base: *mut u8,
    fixup: usize,
    len: usize,
    mode: MapMode,
}

// The region only hands out raw bytes; synchronisation is up to the caller.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `len` bytes of `obj` starting at `offset`. A `len` of 0 maps
    /// everything from `offset` to the end of the object.
    pub fn new<M: Mappable + ?Sized>(obj: &M, mode: MapMode, offset: u64, len: usize) -> Result<Self> {
        let size = obj.map_size()?;
        let len = match (len, size) {
            (0, Some(size)) => size
                .checked_sub(offset as usize)
                .ok_or(IpcError::InvalidLength)?,
            (len, Some(size)) if platform::ENFORCES_MAP_BOUNDS => {
                if (offset as usize).saturating_add(len) > size {
                    return Err(IpcError::InvalidLength);
                }
                len
            }
            (len, _) => len,
        };
        if len == 0 {
            return Err(IpcError::InvalidLength);
        }

        let fixup = (offset % mmap_offset_multiple() as u64) as usize;
        let base = platform::map(obj.map_source(), offset - fixup as u64, len + fixup, mode)?;
        tracing::trace!(offset, len, fixup, ?mode, "mapped region");
        Ok(Self {
            base,
            fixup,
            len,
            mode,
        })
    }

    /// Mapped bytes, exactly as requested.
    pub fn data(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Mutable view of the mapped bytes.
    ///
    /// # Panics
    /// If the region was mapped read-only.
    pub fn data_mut(&mut self) -> &mut [u8] {
        assert!(self.mode.is_writable(), "region is mapped read-only");
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    pub fn as_ptr(&self) -> *const u8 {
        unsafe { self.base.add(self.fixup) }
    }

    /// Raw pointer for shared-cell access from several handles or threads.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        unsafe { self.base.add(self.fixup) }
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    /// Write dirty pages back to the backing object. With `asynchronous`
    /// the write is only scheduled.
    pub fn flush(&self, asynchronous: bool) -> Result<()> {
        unsafe { platform::flush(self.base, self.len + self.fixup, asynchronous) }
    }

    /// Unmap, reporting any OS error.
    pub fn close(self) -> Result<()> {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { platform::unmap(this.base, this.len + this.fixup) }
    }

    pub fn reader(&self) -> RegionReader<'_> {
        RegionReader { region: self, pos: 0 }
    }

    /// Fails with `InvalidFlags` on read-only mappings.
    pub fn writer(&mut self) -> Result<RegionWriter<'_>> {
        if !self.mode.is_writable() {
            return Err(IpcError::InvalidFlags);
        }
        Ok(RegionWriter { region: self, pos: 0 })
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = unsafe { platform::unmap(self.base, self.len + self.fixup) } {
            tracing::warn!(error = %e, "failed to unmap region");
        }
    }
}

fn seek_to(pos: usize, len: usize, target: SeekFrom) -> io::Result<usize> {
    let next = match target {
        SeekFrom::Start(o) => Some(o as i128),
        SeekFrom::End(o) => Some(len as i128 + o as i128),
        SeekFrom::Current(o) => Some(pos as i128 + o as i128),
    };
    match next {
        Some(n) if n >= 0 && n <= usize::MAX as i128 => Ok(n as usize),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek to a negative or overflowing position",
        )),
    }
}

/// `io::Read + Seek` cursor over a region.
pub struct RegionReader<'a> {
    region: &'a MappedRegion,
    pos: usize,
}

impl Read for RegionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.region.data();
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for RegionReader<'_> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        self.pos = seek_to(self.pos, self.region.size(), target)?;
        Ok(self.pos as u64)
    }
}

/// `io::Write + Seek` cursor over a writable region. Writes past the end
/// return 0 bytes.
pub struct RegionWriter<'a> {
    region: &'a mut MappedRegion,
    pos: usize,
}

impl Write for RegionWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pos = self.pos;
        let data = self.region.data_mut();
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        data[pos..pos + n].copy_from_slice(&buf[..n]);
        self.pos += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.region.flush(false).map_err(io::Error::from)
    }
}

impl Seek for RegionWriter<'_> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        self.pos = seek_to(self.pos, self.region.size(), target)?;
        Ok(self.pos as u64)
    }
}
