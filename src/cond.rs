// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named condition variables. Two flavours:
//
// - `FutexCond` (Linux, FreeBSD): a 32-bit sequence counter in `<name>`.
// - `WaitlistCond` (everywhere): a bounded list of waiter ids in
//   `<name>.wl`, guarded by the named mutex `<name>.wl.lock`; each waiter
//   parks on its own `NamedEvent` called `cev.<id>`.
//
// Both may wake spuriously; callers re-check their predicate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::{IpcError, Result};
use crate::event::NamedEvent;
use crate::flags::{OpenFlags, OpenMode};
use crate::memory_object::{map_shared, MemoryObject};
use crate::mmap::MappedRegion;
use crate::mutex::{Locker, NamedMutex, MUTEX_SUFFIX_MAX};
use crate::shm_name;
use crate::waiter::{poll_until, INIT_TIMEOUT};

/// Capacity of a waitlist cond. Stored in the shared header so every peer
/// agrees on it.
pub const MAX_COND_WAITERS: usize = 128;

/// Longest suffix a cond of either flavour adds to its name.
pub(crate) const COND_SUFFIX_MAX: usize = ".wl.lock".len() + MUTEX_SUFFIX_MAX;

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub type NamedCond = FutexCond;

#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
pub type NamedCond = WaitlistCond;

// ---------------------------------------------------------------------------
// Futex flavour
// ---------------------------------------------------------------------------

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub struct FutexCond {
    region: MappedRegion,
    name: String,
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
impl FutexCond {
    pub fn new(name: &str, flags: OpenFlags, perm: u32) -> Result<Self> {
        shm_name::validate_name(name)?;
        flags.validate()?;
        let (region, created) = map_shared(name, flags.mode()?, perm, std::mem::size_of::<u32>())?;
        tracing::debug!(name, created, "futex cond acquired");
        Ok(Self {
            region,
            name: name.to_string(),
        })
    }

    fn seq(&self) -> &AtomicU32 {
        unsafe { &*(self.region.as_mut_ptr() as *const AtomicU32) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release `lock`, sleep until signaled, re-take `lock`.
    pub fn wait<L: Locker + ?Sized>(&self, lock: &L) -> Result<()> {
        self.wait_for(lock, None).map(|_| ())
    }

    /// As [`wait`](Self::wait); `Ok(false)` when `timeout` elapsed.
    pub fn wait_timeout<L: Locker + ?Sized>(&self, lock: &L, timeout: Duration) -> Result<bool> {
        self.wait_for(lock, Some(timeout))
    }

    fn wait_for<L: Locker + ?Sized>(&self, lock: &L, timeout: Option<Duration>) -> Result<bool> {
        let seq = self.seq().load(Ordering::Acquire);
        lock.unlock()?;
        // A signal between the load and the wait changes `seq` and the
        // kernel refuses to sleep.
        let r = crate::platform::futex_wait(self.seq(), seq, timeout);
        lock.lock()?;
        match r {
            Ok(()) => Ok(true),
            Err(IpcError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn signal(&self) -> Result<()> {
        self.seq().fetch_add(1, Ordering::Release);
        crate::platform::futex_wake(self.seq(), 1).map(|_| ())
    }

    pub fn broadcast(&self) -> Result<()> {
        self.seq().fetch_add(1, Ordering::Release);
        crate::platform::futex_wake(self.seq(), i32::MAX as u32).map(|_| ())
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
        MemoryObject::destroy_by_name(name)
    }
}

// ---------------------------------------------------------------------------
// Waitlist flavour
// ---------------------------------------------------------------------------

// `perm` is the creator's permission word; every waiter creates its event
// with it so openers never need to know it.
#[repr(C)]
struct WaitList {
    capacity: AtomicU32,
    perm: AtomicU32,
    count: u32,
    ids: [u64; MAX_COND_WAITERS],
}

impl WaitList {
    fn push(&mut self, id: u64) -> bool {
        let n = self.count as usize;
        if n == MAX_COND_WAITERS {
            return false;
        }
        self.ids[n] = id;
        self.count += 1;
        true
    }

    /// Remove `id`, keeping arrival order. Returns whether it was listed.
    fn remove(&mut self, id: u64) -> bool {
        let n = self.count as usize;
        match self.ids[..n].iter().position(|&x| x == id) {
            Some(i) => {
                self.ids.copy_within(i + 1..n, i);
                self.count -= 1;
                true
            }
            None => false,
        }
    }

    /// Drop the first `k` entries.
    fn drain_front(&mut self, k: usize) {
        let n = self.count as usize;
        self.ids.copy_within(k..n, 0);
        self.count -= k as u32;
    }
}

const WAIT_LIST_SIZE: usize = std::mem::size_of::<WaitList>();

static WAITER_SEQ: AtomicU32 = AtomicU32::new(0);

fn next_waiter_id() -> u64 {
    let pid = crate::platform::current_pid() as u64;
    (pid << 32) | WAITER_SEQ.fetch_add(1, Ordering::Relaxed) as u64
}

fn waiter_event_name(id: u64) -> String {
    format!("cev.{id}")
}

pub struct WaitlistCond {
    list_lock: NamedMutex,
    region: MappedRegion,
    name: String,
    perm: u32,
}

impl WaitlistCond {
    /// `perm` only applies when this call creates the cond; openers adopt
    /// the creator's.
    pub fn new(name: &str, flags: OpenFlags, perm: u32) -> Result<Self> {
        shm_name::validate_with_suffix(name, COND_SUFFIX_MAX)?;
        flags.validate()?;
        let mode = flags.mode()?;
        let (region, created) = map_shared(&format!("{name}.wl"), mode, perm, WAIT_LIST_SIZE)?;
        let lock_name = format!("{name}.wl.lock");
        // Only the atomic header fields are touched here.
        let header = unsafe { &*(region.as_mut_ptr() as *const WaitList) };
        let (list_lock, perm) = if created {
            let list_lock = NamedMutex::new(&lock_name, mode.into(), perm)?;
            header.perm.store(perm, Ordering::Relaxed);
            header.capacity.store(MAX_COND_WAITERS as u32, Ordering::Release);
            (list_lock, perm)
        } else {
            let seen = poll_until(INIT_TIMEOUT, || {
                let cap = header.capacity.load(Ordering::Acquire);
                Ok((cap != 0).then_some(cap))
            })?
            .unwrap_or(0);
            if seen as usize != MAX_COND_WAITERS {
                tracing::debug!(name, capacity = seen, "waitlist capacity mismatch");
                return Err(IpcError::InvalidLength);
            }
            let perm = header.perm.load(Ordering::Relaxed);
            (NamedMutex::new(&lock_name, mode.into(), perm)?, perm)
        };
        tracing::debug!(name, created, perm, "waitlist cond acquired");
        Ok(Self {
            list_lock,
            region,
            name: name.to_string(),
            perm,
        })
    }

    /// Run `f` on the shared list with the list mutex held.
    fn with_list<R>(&self, f: impl FnOnce(&mut WaitList) -> R) -> Result<R> {
        self.list_lock.lock()?;
        let list = unsafe { &mut *(self.region.as_mut_ptr() as *mut WaitList) };
        let r = f(list);
        self.list_lock.unlock()?;
        Ok(r)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wait<L: Locker + ?Sized>(&self, lock: &L) -> Result<()> {
        self.wait_for(lock, None).map(|_| ())
    }

    pub fn wait_timeout<L: Locker + ?Sized>(&self, lock: &L, timeout: Duration) -> Result<bool> {
        self.wait_for(lock, Some(timeout))
    }

    /// # Panics
    /// With `TooManyWaiters` when [`MAX_COND_WAITERS`] threads already wait.
    fn wait_for<L: Locker + ?Sized>(&self, lock: &L, timeout: Option<Duration>) -> Result<bool> {
        let id = next_waiter_id();
        let ev_name = waiter_event_name(id);
        NamedEvent::destroy_by_name(&ev_name)?;
        let event = NamedEvent::new(&ev_name, OpenMode::Create.into(), self.perm, false)?;
        if !self.with_list(|l| l.push(id))? {
            let _ = event.destroy();
            panic!("{}", IpcError::TooManyWaiters);
        }

        lock.unlock()?;
        let woke = match timeout {
            None => event.wait().map(|()| true),
            Some(d) => event.wait_timeout(d),
        };
        let relocked = lock.lock();

        // Signallers remove the entries they set; a missing entry means the
        // wakeup was delivered even if the wait itself timed out.
        let listed = self.with_list(|l| l.remove(id))?;
        event.destroy()?;
        relocked?;
        Ok(woke? || !listed)
    }

    pub fn signal(&self) -> Result<()> {
        self.wake(1)
    }

    pub fn broadcast(&self) -> Result<()> {
        self.wake(MAX_COND_WAITERS)
    }

    fn wake(&self, n: usize) -> Result<()> {
        self.with_list(|list| {
            let take = n.min(list.count as usize);
            let mut res = Ok(());
            for &id in &list.ids[..take] {
                let flags = OpenFlags::from(OpenMode::Open);
                match NamedEvent::new(&waiter_event_name(id), flags, self.perm, false) {
                    Ok(ev) => {
                        if let Err(e) = ev.set() {
                            res = Err(e);
                        }
                    }
                    // The waiting process is gone.
                    Err(IpcError::NotFound) => tracing::warn!(id, "skipping dead cond waiter"),
                    Err(e) => res = Err(e),
                }
            }
            list.drain_front(take);
            res
        })?
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
        let list = MemoryObject::destroy_by_name(&format!("{name}.wl"));
        NamedMutex::destroy_by_name(&format!("{name}.wl.lock")).and(list)
    }
}
