// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named, resizable memory objects visible to every process that opens the
// same name. Mapping them into the address space is done by `MappedRegion`.

use crate::error::{IpcError, Result};
use crate::flags::{validate_perm, OpenFlags, OpenMode};
use crate::mmap::{MapMode, MappedRegion};
use crate::open_or_create::open_or_create;
use crate::platform::{self, RawObject};
use crate::shm_name;
use crate::waiter::{poll_until, INIT_TIMEOUT};

pub use crate::platform::MapSource;

/// Anything `MappedRegion` can map: a descriptor (or handle) plus, when the
/// backing store has one, its current size.
pub trait Mappable {
    fn map_source(&self) -> MapSource<'_>;

    fn map_size(&self) -> Result<Option<usize>>;
}

impl Mappable for std::fs::File {
    fn map_source(&self) -> MapSource<'_> {
        platform::map_source(self)
    }

    fn map_size(&self) -> Result<Option<usize>> {
        platform::object_size(self).map(|s| Some(s as usize))
    }
}

/// A process-local handle to a named memory object.
///
/// Dropping (or [`close`](Self::close)-ing) the handle never removes the
/// object; only [`destroy`](Self::destroy) / [`destroy_by_name`](Self::destroy_by_name)
/// do. Mappings created from the handle stay valid after it is closed.
#[derive(Debug)]
pub struct MemoryObject {
    file: RawObject,
    name: String,
    created: bool,
    writable: bool,
}

impl MemoryObject {
    /// Create and/or open `name` according to the intent in `flags`.
    pub fn new(name: &str, flags: OpenFlags, perm: u32) -> Result<Self> {
        shm_name::validate_name(name)?;
        flags.validate()?;
        validate_perm(perm)?;
        let writable = flags.is_writable();
        let (file, created) = open_or_create(flags.mode()?, |create| {
            platform::open_memory_object(name, create, writable, perm)
        })?;
        tracing::debug!(name, created, "memory object acquired");
        Ok(Self {
            file,
            name: name.to_string(),
            created,
            writable: writable || created,
        })
    }

    /// Like [`new`](Self::new), sizing the object to `size` bytes when this
    /// call created it. An existing object keeps its size.
    pub fn with_size(name: &str, flags: OpenFlags, perm: u32, size: usize) -> Result<Self> {
        let obj = Self::new(name, flags, perm)?;
        if obj.created {
            if let Err(e) = obj.resize(size) {
                let _ = platform::destroy_memory_object(name);
                return Err(e);
            }
        }
        Ok(obj)
    }

    /// Name as given by the caller (platform mangling is not visible).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the object.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Current size in bytes, as seen by every peer.
    pub fn size(&self) -> Result<usize> {
        platform::object_size(&self.file).map(|s| s as usize)
    }

    /// Set the object's size. Existing mappings are not extended.
    pub fn resize(&self, size: usize) -> Result<()> {
        if !self.writable {
            return Err(IpcError::InvalidFlags);
        }
        platform::resize_object(&self.file, size as u64)
    }

    /// Release the local handle; the object stays registered.
    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    /// Release the local handle and remove the name from the host.
    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    /// Remove `name` from the host namespace. Succeeds if it is already gone.
    pub fn destroy_by_name(name: &str) -> Result<()> {
        shm_name::validate_name(name)?;
        tracing::debug!(name, "destroying memory object");
        platform::destroy_memory_object(name)
    }
}

impl Mappable for MemoryObject {
    fn map_source(&self) -> MapSource<'_> {
        platform::map_source(&self.file)
    }

    fn map_size(&self) -> Result<Option<usize>> {
        self.size().map(Some)
    }
}

/// Acquire `name` read-write, sized `size` when created here, and map its
/// first `size` bytes. Returns the mapping and whether this call created the
/// object. The object handle itself is released; the mapping keeps the
/// memory alive. Openers wait up to [`INIT_TIMEOUT`] for a concurrent
/// creator to size the object.
pub(crate) fn map_shared(name: &str, mode: OpenMode, perm: u32, size: usize) -> Result<(MappedRegion, bool)> {
    let obj = MemoryObject::with_size(name, mode.into(), perm, size)?;
    if !obj.created() {
        let sized = poll_until(INIT_TIMEOUT, || Ok((obj.size()? >= size).then_some(())))?;
        if sized.is_none() {
            tracing::debug!(name, size, "shared object never reached its size");
            return Err(IpcError::InvalidLength);
        }
    }
    let region = MappedRegion::new(&obj, MapMode::ReadWrite, 0, size)?;
    Ok((region, obj.created()))
}

/// Remove `name` if the calling constructor created it and then failed a
/// later step.
pub(crate) fn discard_created(name: &str, created: bool) {
    if !created {
        return;
    }
    if let Err(e) = MemoryObject::destroy_by_name(name) {
        tracing::warn!(name, error = %e, "failed to remove partially created object");
    }
}

/// A paging-file backed section: fixed size, cannot be destroyed, vanishes
/// when the last handle closes.
#[cfg(windows)]
pub struct NativeMemoryObject {
    section: platform::NativeSection,
    name: String,
    created: bool,
}

#[cfg(windows)]
impl NativeMemoryObject {
    pub fn new(name: &str, flags: OpenFlags, size: usize) -> Result<Self> {
        shm_name::validate_name(name)?;
        flags.validate()?;
        let writable = flags.is_writable();
        let (section, created) = open_or_create(flags.mode()?, |create| {
            if create {
                platform::NativeSection::create(name, size as u64)
            } else {
                platform::NativeSection::open(name, writable)
            }
        })?;
        Ok(Self {
            section,
            name: name.to_string(),
            created,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> bool {
        self.created
    }

    pub fn size(&self) -> Result<usize> {
        self.section.size().map(|s| s as usize)
    }
}

#[cfg(windows)]
impl Mappable for NativeMemoryObject {
    fn map_source(&self) -> MapSource<'_> {
        self.section.source()
    }

    fn map_size(&self) -> Result<Option<usize>> {
        self.size().map(Some)
    }
}
