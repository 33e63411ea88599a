// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named inter-process mutexes: a lightweight mutex cell in a named memory
// object plus a wait/wake backend. `NamedMutex` is the platform default.

use std::sync::atomic::AtomicI32;
use std::time::Duration;

use crate::error::Result;
use crate::flags::OpenFlags;
use crate::lw_mutex::{LwMutex, LW_MUTEX_SIZE};
use crate::memory_object::{discard_created, map_shared, MemoryObject};
use crate::mmap::MappedRegion;
use crate::semaphore::{NamedSemaphore, SEMAPHORE_SUFFIX_MAX};
use crate::shm_name::{self, longest};
use crate::waiter::{SemaWaiter, SpinWaiter, WaitWaker};

/// Longest suffix any mutex backend adds to its name.
pub(crate) const MUTEX_SUFFIX_MAX: usize = longest(".ss".len(), SEMAPHORE_SUFFIX_MAX);

/// Anything that can be locked and unlocked, e.g. the user lock of a
/// condition variable.
pub trait Locker {
    fn lock(&self) -> Result<()>;
    fn unlock(&self) -> Result<()>;
}

/// A named mutex over a shared [`LwMutex`] cell, parking through `W`.
///
/// Every handle opened with the same name (in any process) shares the cell.
/// A holder that dies leaves the mutex locked; the only recovery is
/// destroying and recreating it.
pub struct ShmMutex<W> {
    lw: LwMutex<W>,
    _region: MappedRegion,
    name: String,
    created: bool,
}

/// Futex-backed named mutex; state in `<name>.ss`.
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub type FutexMutex = ShmMutex<crate::waiter::FutexWaiter>;

/// Semaphore-backed named mutex; state in `<name>.ss`, semaphore `<name>`.
pub type SemaMutex = ShmMutex<SemaWaiter>;

/// Spinning named mutex; state in `<name>`.
pub type SpinMutex = ShmMutex<SpinWaiter>;

/// Kernel-event-backed named mutex; state in `<name>.se`, event `<name>`.
#[cfg(windows)]
pub type EventMutex = ShmMutex<crate::waiter::EventWaiter>;

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub type NamedMutex = FutexMutex;

#[cfg(windows)]
pub type NamedMutex = EventMutex;

#[cfg(all(unix, not(any(target_os = "linux", target_os = "freebsd"))))]
pub type NamedMutex = SemaMutex;

fn state_ptr(region: &MappedRegion) -> *const AtomicI32 {
    region.as_mut_ptr() as *const AtomicI32
}

impl<W: WaitWaker> ShmMutex<W> {
    fn from_parts(name: &str, region: MappedRegion, created: bool, waiter: W) -> Self {
        let lw = unsafe { LwMutex::new(state_ptr(&region), waiter) };
        Self {
            lw,
            _region: region,
            name: name.to_string(),
            created,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the shared state.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn lock(&self) -> Result<()> {
        self.lw.lock()
    }

    pub fn try_lock(&self) -> bool {
        self.lw.try_lock()
    }

    /// `Ok(false)` if `timeout` elapsed before the lock was taken.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<bool> {
        self.lw.lock_timeout(timeout)
    }

    /// # Panics
    /// If the mutex is not locked.
    pub fn unlock(&self) -> Result<()> {
        self.lw.unlock()
    }

    /// Release this handle; the named state stays.
    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl<W: WaitWaker> Locker for ShmMutex<W> {
    fn lock(&self) -> Result<()> {
        ShmMutex::lock(self)
    }

    fn unlock(&self) -> Result<()> {
        ShmMutex::unlock(self)
    }
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
impl ShmMutex<crate::waiter::FutexWaiter> {
    pub fn new(name: &str, flags: OpenFlags, perm: u32) -> Result<Self> {
        shm_name::validate_with_suffix(name, MUTEX_SUFFIX_MAX)?;
        flags.validate()?;
        let (region, created) = map_shared(&format!("{name}.ss"), flags.mode()?, perm, LW_MUTEX_SIZE)?;
        let waiter = unsafe { crate::waiter::FutexWaiter::new(region.as_mut_ptr() as *const _) };
        tracing::debug!(name, created, "futex mutex acquired");
        Ok(Self::from_parts(name, region, created, waiter))
    }

    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    pub fn destroy_by_name(name: &str) -> Result<()> {
        MemoryObject::destroy_by_name(&format!("{name}.ss"))
    }
}

impl ShmMutex<SemaWaiter> {
    pub fn new(name: &str, flags: OpenFlags, perm: u32) -> Result<Self> {
        shm_name::validate_with_suffix(name, MUTEX_SUFFIX_MAX)?;
        flags.validate()?;
        let mode = flags.mode()?;
        let state_name = format!("{name}.ss");
        let (region, created) = map_shared(&state_name, mode, perm, LW_MUTEX_SIZE)?;
        let sem = NamedSemaphore::new(name, mode.into(), perm, 0)
            .inspect_err(|_| discard_created(&state_name, created))?;
        tracing::debug!(name, created, "semaphore mutex acquired");
        Ok(Self::from_parts(name, region, created, SemaWaiter::new(sem)))
    }

    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    /// Remove the state and the semaphore, reporting the later error.
    pub fn destroy_by_name(name: &str) -> Result<()> {
        let state = MemoryObject::destroy_by_name(&format!("{name}.ss"));
        NamedSemaphore::destroy_by_name(name).and(state)
    }
}

impl ShmMutex<SpinWaiter> {
    pub fn new(name: &str, flags: OpenFlags, perm: u32) -> Result<Self> {
        shm_name::validate_with_suffix(name, MUTEX_SUFFIX_MAX)?;
        flags.validate()?;
        let (region, created) = map_shared(name, flags.mode()?, perm, LW_MUTEX_SIZE)?;
        Ok(Self::from_parts(name, region, created, SpinWaiter))
    }

    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    pub fn destroy_by_name(name: &str) -> Result<()> {
        MemoryObject::destroy_by_name(name)
    }
}

#[cfg(windows)]
impl ShmMutex<crate::waiter::EventWaiter> {
    pub fn new(name: &str, flags: OpenFlags, perm: u32) -> Result<Self> {
        use crate::open_or_create::open_or_create;
        use crate::platform::WinEvent;

        shm_name::validate_with_suffix(name, MUTEX_SUFFIX_MAX)?;
        flags.validate()?;
        let mode = flags.mode()?;
        let state_name = format!("{name}.se");
        let (region, created) = map_shared(&state_name, mode, perm, LW_MUTEX_SIZE)?;
        let (event, _) = open_or_create(mode, |create| {
            if create {
                WinEvent::create(name, false)
            } else {
                WinEvent::open(name)
            }
        })
        .inspect_err(|_| discard_created(&state_name, created))?;
        tracing::debug!(name, created, "event mutex acquired");
        Ok(Self::from_parts(
            name,
            region,
            created,
            crate::waiter::EventWaiter::new(event),
        ))
    }

    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    /// The kernel event goes away with its last handle.
    pub fn destroy_by_name(name: &str) -> Result<()> {
        MemoryObject::destroy_by_name(&format!("{name}.se"))
    }
}
