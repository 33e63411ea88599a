// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Inter-process communication building blocks: named memory objects and
// mappings, lightweight synchronisation cells with pluggable wait/wake
// backends, named mutexes, events, semaphores and condition variables, and
// a shared-memory priority message queue.
//
// The library logs through `tracing` and installs no subscriber.

pub mod error;
pub use error::{is_transient, IpcError, Result};

pub mod flags;
pub use flags::{OpenFlags, OpenMode, DEFAULT_PERM};

pub mod open_or_create;
pub use open_or_create::open_or_create;

pub mod shm_name;

mod platform;

pub mod memory_object;
pub use memory_object::{Mappable, MemoryObject};
#[cfg(windows)]
pub use memory_object::NativeMemoryObject;

pub mod mmap;
pub use mmap::{mmap_offset_multiple, MapMode, MappedRegion, RegionReader, RegionWriter};

pub mod waiter;
#[cfg(windows)]
pub use waiter::EventWaiter;
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub use waiter::FutexWaiter;
pub use waiter::{SemaWaiter, SpinWaiter, WaitWaker};

pub mod lw_event;
pub mod lw_mutex;
pub mod lw_rwmutex;
pub use lw_event::LwEvent;
pub use lw_mutex::{LwMutex, SPIN_COUNT};
pub use lw_rwmutex::LwRwMutex;

pub mod semaphore;
pub use semaphore::{NamedSemaphore, SEMAPHORE_MAX_VALUE};

pub mod mutex;
#[cfg(windows)]
pub use mutex::EventMutex;
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub use mutex::FutexMutex;
pub use mutex::{Locker, NamedMutex, SemaMutex, ShmMutex, SpinMutex};

pub mod rw_mutex;
pub use rw_mutex::NamedRwMutex;

pub mod event;
pub use event::NamedEvent;

pub mod cond;
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub use cond::FutexCond;
pub use cond::{NamedCond, WaitlistCond, MAX_COND_WAITERS};

pub mod heap;

pub mod fast_mq;
pub use fast_mq::{FastMq, Messenger};

mod scoped_access;
pub use scoped_access::ScopedAccess;
