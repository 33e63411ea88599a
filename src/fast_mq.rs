// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// FastMq: a bounded priority message queue in a named memory object.
//
// The heap is guarded by the named mutex `<name>.locker`. Blocking senders
// wait on the cond `<name>.nf` (not full), blocking receivers on
// `<name>.ne` (not empty); both conds pair with the locker.

use std::time::{Duration, Instant};

use crate::cond::{NamedCond, COND_SUFFIX_MAX};
use crate::error::{IpcError, Result};
use crate::flags::{validate_queue_perm, OpenFlags, OpenMode};
use crate::heap::{HeapShape, SharedHeap, HEADER_LEN};
use crate::memory_object::MemoryObject;
use crate::mmap::{MapMode, MappedRegion};
use crate::mutex::{NamedMutex, MUTEX_SUFFIX_MAX};
use crate::platform::remaining;
use crate::shm_name::{self, longest};
use crate::waiter::{poll_until, INIT_TIMEOUT};

pub use crate::heap::MAX_PRIORITY;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 8;
pub const DEFAULT_MAX_MSG_SIZE: usize = 8192;

/// Longest suffix the queue's lock and conds add to its name.
const QUEUE_SUFFIX_MAX: usize = longest(
    ".locker".len() + MUTEX_SUFFIX_MAX,
    ".nf".len() + COND_SUFFIX_MAX,
);

/// A message transport.
pub trait Messenger {
    /// Send `data` (priority 0 where priorities exist).
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Receive one message into `buf`, returning its length.
    fn receive(&self, buf: &mut [u8]) -> Result<usize>;

    /// Maximum number of queued messages.
    fn cap(&self) -> usize;

    fn close(self) -> Result<()>
    where
        Self: Sized;
}

fn locker_name(name: &str) -> String {
    format!("{name}.locker")
}

fn not_full_name(name: &str) -> String {
    format!("{name}.nf")
}

fn not_empty_name(name: &str) -> String {
    format!("{name}.ne")
}

/// A handle to a shared priority queue. Higher priorities are received
/// first; equal priorities come out in unspecified order.
///
/// Blocking mode is a property of the handle: non-blocking handles fail with
/// `QueueFull` / `QueueEmpty` instead of waiting.
pub struct FastMq {
    heap: SharedHeap,
    _region: MappedRegion,
    locker: NamedMutex,
    not_full: NamedCond,
    not_empty: NamedCond,
    name: String,
    blocking: bool,
}

impl FastMq {
    /// Create and/or open the queue `name` per `flags`. A newly created queue
    /// gets the given geometry; an existing one keeps its own. `NON_BLOCK`
    /// in `flags` makes the handle non-blocking.
    pub fn new(
        name: &str,
        flags: OpenFlags,
        perm: u32,
        max_queue_size: usize,
        max_msg_size: usize,
    ) -> Result<Self> {
        shm_name::validate_with_suffix(name, QUEUE_SUFFIX_MAX)?;
        flags.validate()?;
        validate_queue_perm(perm)?;
        if max_queue_size == 0
            || max_msg_size == 0
            || max_queue_size > i32::MAX as usize
            || max_msg_size > i32::MAX as usize - 4
        {
            return Err(IpcError::InvalidLength);
        }
        let mode = flags.mode()?;
        let obj = MemoryObject::new(name, mode.into(), perm)?;
        let blocking = !flags.is_non_blocking();
        if obj.created() {
            let shape = HeapShape {
                max_queue_size,
                max_msg_size,
            };
            Self::init_created(obj, shape, perm, blocking).inspect_err(|_| {
                let _ = Self::destroy_by_name(name);
            })
        } else {
            Self::attach(obj, blocking)
        }
    }

    /// Open an existing queue, reading its geometry from the header.
    /// `flags` may carry access and `NON_BLOCK` bits but no create intent.
    pub fn open(name: &str, flags: OpenFlags) -> Result<Self> {
        shm_name::validate_with_suffix(name, QUEUE_SUFFIX_MAX)?;
        flags.validate()?;
        if flags.contains(OpenFlags::CREATE) || flags.contains(OpenFlags::EXCL) {
            return Err(IpcError::InvalidFlags);
        }
        let obj = MemoryObject::new(name, OpenMode::Open.into(), 0)?;
        Self::attach(obj, !flags.is_non_blocking())
    }

    fn init_created(obj: MemoryObject, shape: HeapShape, perm: u32, blocking: bool) -> Result<Self> {
        let name = obj.name().to_string();
        obj.resize(shape.total_size())?;

        // A previous owner may have died holding the lock or parked on a cond.
        for stale in [
            NamedMutex::destroy_by_name(&locker_name(&name)),
            NamedCond::destroy_by_name(&not_full_name(&name)),
            NamedCond::destroy_by_name(&not_empty_name(&name)),
        ] {
            if let Err(e) = stale {
                tracing::warn!(name, error = %e, "failed to remove stale queue state");
            }
        }
        let create = OpenMode::Create.into();
        let locker = NamedMutex::new(&locker_name(&name), create, perm)?;
        let not_full = NamedCond::new(&not_full_name(&name), create, perm)?;
        let not_empty = NamedCond::new(&not_empty_name(&name), create, perm)?;

        let region = MappedRegion::new(&obj, MapMode::ReadWrite, 0, shape.total_size())?;
        let heap = unsafe { SharedHeap::new(region.as_mut_ptr(), shape) };
        heap.init();
        tracing::debug!(
            name,
            max_queue_size = shape.max_queue_size,
            max_msg_size = shape.max_msg_size,
            "queue created"
        );
        Ok(Self {
            heap,
            _region: region,
            locker,
            not_full,
            not_empty,
            name,
            blocking,
        })
    }

    fn attach(obj: MemoryObject, blocking: bool) -> Result<Self> {
        let name = obj.name().to_string();
        let shape = Self::wait_for_shape(&obj)?;
        if obj.size()? < shape.total_size() {
            return Err(IpcError::InvalidLength);
        }
        let open = OpenMode::Open.into();
        let locker = NamedMutex::new(&locker_name(&name), open, 0)?;
        let not_full = NamedCond::new(&not_full_name(&name), open, 0)?;
        let not_empty = NamedCond::new(&not_empty_name(&name), open, 0)?;

        let region = MappedRegion::new(&obj, MapMode::ReadWrite, 0, shape.total_size())?;
        let heap = unsafe { SharedHeap::new(region.as_mut_ptr(), shape) };
        tracing::debug!(name, "queue opened");
        Ok(Self {
            heap,
            _region: region,
            locker,
            not_full,
            not_empty,
            name,
            blocking,
        })
    }

    // The creator publishes the header after everything else is in place.
    fn wait_for_shape(obj: &MemoryObject) -> Result<HeapShape> {
        let shape = poll_until(INIT_TIMEOUT, || {
            if obj.size()? < HEADER_LEN {
                return Ok(None);
            }
            let header = MappedRegion::new(obj, MapMode::ReadOnly, 0, HEADER_LEN)?;
            Ok(unsafe { HeapShape::read(header.as_ptr()) })
        })?;
        shape.ok_or_else(|| {
            tracing::debug!(name = obj.name(), "queue header never published");
            IpcError::InvalidLength
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_queue_size(&self) -> usize {
        self.heap.shape().max_queue_size
    }

    pub fn max_msg_size(&self) -> usize {
        self.heap.shape().max_msg_size
    }

    /// Messages currently queued.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    /// Queue `data` with `prio` (at most [`MAX_PRIORITY`], else
    /// `InvalidLength`). Blocking handles wait for room.
    pub fn send_with_priority(&self, data: &[u8], prio: u32) -> Result<()> {
        self.send_for(data, prio, None)
    }

    /// As [`send_with_priority`](Self::send_with_priority), failing with
    /// `Timeout` if no room frees up within `timeout`.
    pub fn send_timeout(&self, data: &[u8], prio: u32, timeout: Duration) -> Result<()> {
        self.send_for(data, prio, Some(timeout))
    }

    fn send_for(&self, data: &[u8], prio: u32, timeout: Option<Duration>) -> Result<()> {
        if data.len() > self.max_msg_size() {
            return Err(IpcError::MessageTooLong);
        }
        if prio > MAX_PRIORITY {
            return Err(IpcError::InvalidLength);
        }
        if !self.blocking && self.heap.is_full() {
            return Err(IpcError::QueueFull);
        }
        self.locker.lock()?;
        let r = self.push_locked(data, prio, timeout);
        let unlocked = self.locker.unlock();
        r.and(unlocked)
    }

    fn push_locked(&self, data: &[u8], prio: u32, timeout: Option<Duration>) -> Result<()> {
        let start = Instant::now();
        while self.heap.is_full() {
            if !self.blocking {
                return Err(IpcError::QueueFull);
            }
            match remaining(start, timeout) {
                None => self.not_full.wait(&self.locker)?,
                Some(left) if left.is_zero() => {
                    tracing::trace!(name = %self.name, "send timed out");
                    return Err(IpcError::Timeout);
                }
                Some(left) => {
                    self.not_full.wait_timeout(&self.locker, left)?;
                }
            }
        }
        self.heap.push(data, prio);
        self.not_empty.signal()
    }

    /// Take the highest-priority message into `buf`, returning its length
    /// and priority. Blocking handles wait for a message.
    pub fn receive_with_priority(&self, buf: &mut [u8]) -> Result<(usize, u32)> {
        self.receive_for(buf, None)
    }

    /// As [`receive_with_priority`](Self::receive_with_priority), failing
    /// with `Timeout` if nothing arrives within `timeout`.
    pub fn receive_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<(usize, u32)> {
        self.receive_for(buf, Some(timeout))
    }

    fn receive_for(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<(usize, u32)> {
        if !self.blocking && self.heap.is_empty() {
            return Err(IpcError::QueueEmpty);
        }
        self.locker.lock()?;
        let r = self.pop_locked(buf, timeout);
        let unlocked = self.locker.unlock();
        let popped = r?;
        unlocked?;
        Ok(popped)
    }

    fn pop_locked(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<(usize, u32)> {
        let start = Instant::now();
        while self.heap.is_empty() {
            if !self.blocking {
                return Err(IpcError::QueueEmpty);
            }
            match remaining(start, timeout) {
                None => self.not_empty.wait(&self.locker)?,
                Some(left) if left.is_zero() => {
                    tracing::trace!(name = %self.name, "receive timed out");
                    return Err(IpcError::Timeout);
                }
                Some(left) => {
                    self.not_empty.wait_timeout(&self.locker, left)?;
                }
            }
        }
        match self.heap.peek_len() {
            Some(len) if len > buf.len() => return Err(IpcError::MessageTooLong),
            _ => {}
        }
        let popped = self.heap.pop(buf);
        self.not_full.signal()?;
        Ok(popped)
    }

    /// Destroy the queue's lock, conds and memory object.
    pub fn destroy(self) -> Result<()> {
        let name = std::mem::take(&mut { self }.name);
        Self::destroy_by_name(&name)
    }

    /// Remove every named object backing the queue `name`, reporting the
    /// last error.
    pub fn destroy_by_name(name: &str) -> Result<()> {
        shm_name::validate_name(name)?;
        tracing::debug!(name, "destroying queue");
        let locker = NamedMutex::destroy_by_name(&locker_name(name));
        let not_full = NamedCond::destroy_by_name(&not_full_name(name));
        let not_empty = NamedCond::destroy_by_name(&not_empty_name(name));
        let memory = MemoryObject::destroy_by_name(name);
        memory.and(not_empty).and(not_full).and(locker)
    }
}

impl Messenger for FastMq {
    fn send(&self, data: &[u8]) -> Result<()> {
        self.send_with_priority(data, 0)
    }

    fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        self.receive_with_priority(buf).map(|(len, _)| len)
    }

    fn cap(&self) -> usize {
        self.max_queue_size()
    }

    fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }
}
