// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named auto-reset event: an `LwEvent` cell in `<name>.ev` with waiters
// parked on semaphore `<name>`.

use std::sync::atomic::AtomicI32;
use std::time::Duration;

use crate::error::Result;
use crate::flags::OpenFlags;
use crate::lw_event::{LwEvent, LW_EVENT_SIZE};
use crate::memory_object::{discard_created, map_shared, MemoryObject};
use crate::mmap::MappedRegion;
use crate::semaphore::{NamedSemaphore, SEMAPHORE_SUFFIX_MAX};
use crate::shm_name::{self, longest};
use crate::waiter::SemaWaiter;

/// Longest suffix an event adds to its name.
const EVENT_SUFFIX_MAX: usize = longest(".ev".len(), SEMAPHORE_SUFFIX_MAX);

/// A named auto-reset event: each [`set`](Self::set) releases exactly one
/// waiter, or stays signaled until the next wait if nobody waits.
pub struct NamedEvent {
    lw: LwEvent<SemaWaiter>,
    _region: MappedRegion,
    name: String,
}

impl NamedEvent {
    /// `initial` only applies when this call creates the event.
    pub fn new(name: &str, flags: OpenFlags, perm: u32, initial: bool) -> Result<Self> {
        shm_name::validate_with_suffix(name, EVENT_SUFFIX_MAX)?;
        flags.validate()?;
        let mode = flags.mode()?;
        let state_name = format!("{name}.ev");
        let (region, created) = map_shared(&state_name, mode, perm, LW_EVENT_SIZE)?;
        let sem = NamedSemaphore::new(name, mode.into(), perm, 0)
            .inspect_err(|_| discard_created(&state_name, created))?;
        let lw = unsafe { LwEvent::new(region.as_mut_ptr() as *const AtomicI32, SemaWaiter::new(sem)) };
        // Fresh cells are zero (unsignaled); an early waiter is handled by set().
        if created && initial {
            lw.set()?;
        }
        tracing::debug!(name, created, "event acquired");
        Ok(Self {
            lw,
            _region: region,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self) -> Result<()> {
        self.lw.set()
    }

    pub fn wait(&self) -> Result<()> {
        self.lw.wait()
    }

    /// `Ok(false)` on timeout; a zero timeout polls.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.lw.wait_timeout(timeout)
    }

    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    pub fn destroy_by_name(name: &str) -> Result<()> {
        let state = MemoryObject::destroy_by_name(&format!("{name}.ev"));
        NamedSemaphore::destroy_by_name(name).and(state)
    }
}
