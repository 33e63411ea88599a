// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named counting semaphore: System V semaphores on unix, kernel semaphore
// objects on Windows.

use std::time::Duration;

use crate::error::{IpcError, Result};
use crate::flags::{validate_perm, OpenFlags};
use crate::open_or_create::open_or_create;
use crate::platform;
use crate::shm_name;

/// Largest value a semaphore can hold on every supported platform.
pub const SEMAPHORE_MAX_VALUE: u32 = 32767;

#[cfg(unix)]
type RawSemaphore = platform::SysvSemaphore;
#[cfg(windows)]
type RawSemaphore = platform::WinSemaphore;

/// A named counting semaphore shared between processes.
///
/// On unix the kernel object outlives every handle and must be removed with
/// [`destroy`](Self::destroy) or [`destroy_by_name`](Self::destroy_by_name).
/// On Windows it disappears with its last handle and destroying is a no-op.
pub struct NamedSemaphore {
    raw: RawSemaphore,
    name: String,
    created: bool,
}

impl std::fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .field("created", &self.created)
            .finish()
    }
}

/// Longest suffix added to a semaphore name (the SysV key file).
pub(crate) const SEMAPHORE_SUFFIX_MAX: usize = ".key".len();

impl NamedSemaphore {
    /// Create and/or open `name`. `initial` only applies when this call
    /// creates the semaphore and must not exceed [`SEMAPHORE_MAX_VALUE`].
    pub fn new(name: &str, flags: OpenFlags, perm: u32, initial: u32) -> Result<Self> {
        shm_name::validate_with_suffix(name, SEMAPHORE_SUFFIX_MAX)?;
        flags.validate()?;
        validate_perm(perm)?;
        if initial > SEMAPHORE_MAX_VALUE {
            return Err(IpcError::InvalidLength);
        }
        let (raw, created) = open_or_create(flags.mode()?, |create| {
            if create {
                Self::create_raw(name, perm, initial)
            } else {
                Self::open_raw(name)
            }
        })?;
        tracing::debug!(name, created, "semaphore acquired");
        Ok(Self {
            raw,
            name: name.to_string(),
            created,
        })
    }

    #[cfg(unix)]
    fn create_raw(name: &str, perm: u32, initial: u32) -> Result<RawSemaphore> {
        platform::SysvSemaphore::create(name, perm, initial)
    }

    #[cfg(windows)]
    fn create_raw(name: &str, _perm: u32, initial: u32) -> Result<RawSemaphore> {
        platform::WinSemaphore::create(name, initial, SEMAPHORE_MAX_VALUE)
    }

    fn open_raw(name: &str) -> Result<RawSemaphore> {
        RawSemaphore::open(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> bool {
        self.created
    }

    /// Add `n` to the value, waking up to `n` waiters.
    pub fn signal(&self, n: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.raw.signal(n)
    }

    /// Take one unit, blocking while the value is 0.
    pub fn wait(&self) -> Result<()> {
        self.raw.wait(None)
    }

    /// Take one unit, waiting at most `timeout`. `Ok(false)` when it elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        match self.raw.wait(Some(timeout)) {
            Ok(()) => Ok(true),
            Err(IpcError::Timeout) => {
                tracing::trace!(name = %self.name, "semaphore wait timed out");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Take one unit if available without blocking.
    pub fn try_wait(&self) -> Result<bool> {
        match self.raw.try_wait() {
            Ok(()) => Ok(true),
            Err(IpcError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Wait with an optional bound; an elapsed bound is `Err(Timeout)`.
    pub fn wait_for(&self, timeout: Option<Duration>) -> Result<()> {
        self.raw.wait(timeout)
    }

    /// Current value, where the platform can report it.
    #[cfg(unix)]
    pub fn value(&self) -> Result<u32> {
        self.raw.value()
    }

    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    /// Remove the semaphore named `name`. Absent names are not an error.
    pub fn destroy_by_name(name: &str) -> Result<()> {
        shm_name::validate_name(name)?;
        tracing::debug!(name, "destroying semaphore");
        #[cfg(unix)]
        {
            platform::SysvSemaphore::destroy(name)
        }
        #[cfg(windows)]
        {
            Ok(())
        }
    }
}
