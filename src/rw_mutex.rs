// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named reader/writer mutex: packed state in `<name>.srw`, readers park on
// semaphore `<name>.rs`, writers on `<name>.ws`.

use std::sync::atomic::AtomicU64;

use crate::error::Result;
use crate::flags::OpenFlags;
use crate::lw_rwmutex::{LwRwMutex, LW_RW_MUTEX_SIZE};
use crate::memory_object::{discard_created, map_shared, MemoryObject};
use crate::mmap::MappedRegion;
use crate::mutex::Locker;
use crate::semaphore::{NamedSemaphore, SEMAPHORE_SUFFIX_MAX};
use crate::shm_name;
use crate::waiter::SemaWaiter;

/// Longest suffix a rw mutex adds to its name (`.rs` / `.ws` key files).
const RW_SUFFIX_MAX: usize = ".rs".len() + SEMAPHORE_SUFFIX_MAX;

/// Writer-preferring named reader/writer mutex. Once a writer queues, new
/// readers park until every writer has gone.
pub struct NamedRwMutex {
    lw: LwRwMutex<SemaWaiter>,
    _region: MappedRegion,
    name: String,
}

impl NamedRwMutex {
    pub fn new(name: &str, flags: OpenFlags, perm: u32) -> Result<Self> {
        shm_name::validate_with_suffix(name, RW_SUFFIX_MAX)?;
        flags.validate()?;
        let mode = flags.mode()?;
        let state_name = format!("{name}.srw");
        let (region, created) = map_shared(&state_name, mode, perm, LW_RW_MUTEX_SIZE)?;
        let readers = NamedSemaphore::new(&format!("{name}.rs"), mode.into(), perm, 0)
            .inspect_err(|_| discard_created(&state_name, created))?;
        let writers = match NamedSemaphore::new(&format!("{name}.ws"), mode.into(), perm, 0) {
            Ok(sem) => sem,
            Err(e) => {
                discard_created(&state_name, created);
                if readers.created() {
                    let _ = readers.destroy();
                }
                return Err(e);
            }
        };
        let lw = unsafe {
            LwRwMutex::new(
                region.as_mut_ptr() as *const AtomicU64,
                SemaWaiter::new(readers),
                SemaWaiter::new(writers),
            )
        };
        tracing::debug!(name, created, "rw mutex acquired");
        Ok(Self {
            lw,
            _region: region,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exclusive (writer) lock.
    pub fn lock(&self) -> Result<()> {
        self.lw.lock()
    }

    pub fn try_lock(&self) -> bool {
        self.lw.try_lock()
    }

    pub fn unlock(&self) -> Result<()> {
        self.lw.unlock()
    }

    /// Shared (reader) lock.
    pub fn rlock(&self) -> Result<()> {
        self.lw.rlock()
    }

    pub fn try_rlock(&self) -> bool {
        self.lw.try_rlock()
    }

    pub fn runlock(&self) -> Result<()> {
        self.lw.runlock()
    }

    /// A [`Locker`] view taking the shared side.
    pub fn read_locker(&self) -> ReadLocker<'_> {
        ReadLocker(self)
    }

    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    /// Remove state and both semaphores, reporting the last error.
    pub fn destroy_by_name(name: &str) -> Result<()> {
        let state = MemoryObject::destroy_by_name(&format!("{name}.srw"));
        let readers = NamedSemaphore::destroy_by_name(&format!("{name}.rs"));
        let writers = NamedSemaphore::destroy_by_name(&format!("{name}.ws"));
        writers.and(readers).and(state)
    }
}

impl Locker for NamedRwMutex {
    fn lock(&self) -> Result<()> {
        NamedRwMutex::lock(self)
    }

    fn unlock(&self) -> Result<()> {
        NamedRwMutex::unlock(self)
    }
}

pub struct ReadLocker<'a>(&'a NamedRwMutex);

impl Locker for ReadLocker<'_> {
    fn lock(&self) -> Result<()> {
        self.0.rlock()
    }

    fn unlock(&self) -> Result<()> {
        self.0.runlock()
    }
}
