// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Writer-preferring reader/writer mutex over a packed 64-bit shared cell:
//
//   bits  0..21  active readers
//   bits 21..42  readers parked behind a writer
//   bits 42..63  writers (holding or queued)
//
// Parking goes through two backends, one per side. Backends must keep wakes
// issued before the matching wait (counting semaphores do).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::waiter::WaitWaker;

const FIELD_BITS: u32 = 21;
const FIELD_MASK: u64 = (1 << FIELD_BITS) - 1;
const READER_SHIFT: u32 = 0;
const WAITING_SHIFT: u32 = FIELD_BITS;
const WRITER_SHIFT: u32 = 2 * FIELD_BITS;

/// Size of the shared cell in bytes.
pub const LW_RW_MUTEX_SIZE: usize = std::mem::size_of::<u64>();

/// Decoded view of the packed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RwState(pub(crate) u64);

impl RwState {
    fn field(self, shift: u32) -> u64 {
        (self.0 >> shift) & FIELD_MASK
    }

    fn with_field(self, shift: u32, v: u64) -> Self {
        assert!(v <= FIELD_MASK, "rw mutex counter overflow");
        RwState((self.0 & !(FIELD_MASK << shift)) | (v << shift))
    }

    pub(crate) fn readers(self) -> u64 {
        self.field(READER_SHIFT)
    }

    pub(crate) fn waiting_readers(self) -> u64 {
        self.field(WAITING_SHIFT)
    }

    pub(crate) fn writers(self) -> u64 {
        self.field(WRITER_SHIFT)
    }

    pub(crate) fn with_readers(self, v: u64) -> Self {
        self.with_field(READER_SHIFT, v)
    }

    pub(crate) fn with_waiting_readers(self, v: u64) -> Self {
        self.with_field(WAITING_SHIFT, v)
    }

    pub(crate) fn with_writers(self, v: u64) -> Self {
        self.with_field(WRITER_SHIFT, v)
    }
}

pub struct LwRwMutex<W> {
    state: *const AtomicU64,
    readers: W,
    writers: W,
}

unsafe impl<W: Send> Send for LwRwMutex<W> {}
unsafe impl<W: Sync> Sync for LwRwMutex<W> {}

impl<W: WaitWaker> LwRwMutex<W> {
    /// # Safety
    /// `state` must point to an 8-byte aligned cell that stays mapped for the
    /// lifetime of the returned value.
    pub unsafe fn new(state: *const AtomicU64, readers: W, writers: W) -> Self {
        Self {
            state,
            readers,
            writers,
        }
    }

    fn state(&self) -> &AtomicU64 {
        unsafe { &*self.state }
    }

    pub fn init(&self) {
        self.state().store(0, Ordering::Release);
    }

    /// Exclusive lock. Queues behind active readers and earlier writers.
    pub fn lock(&self) -> Result<()> {
        let one = 1u64 << WRITER_SHIFT;
        let new = RwState(self.state().fetch_add(one, Ordering::Acquire).wrapping_add(one));
        if new.readers() > 0 || new.writers() > 1 {
            self.writers.wait(0, None)?;
        }
        Ok(())
    }

    pub fn try_lock(&self) -> bool {
        let state = self.state();
        let old = RwState(state.load(Ordering::Relaxed));
        if old.readers() != 0 || old.writers() != 0 {
            return false;
        }
        state
            .compare_exchange(old.0, old.with_writers(1).0, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Shared lock. Parks while any writer holds or waits for the lock.
    pub fn rlock(&self) -> Result<()> {
        let state = self.state();
        let mut old = state.load(Ordering::Relaxed);
        loop {
            let o = RwState(old);
            let (new, park) = if o.writers() == 0 {
                (o.with_readers(o.readers() + 1), false)
            } else {
                (o.with_waiting_readers(o.waiting_readers() + 1), true)
            };
            match state.compare_exchange_weak(old, new.0, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => {
                    if park {
                        self.readers.wait(0, None)?;
                    }
                    return Ok(());
                }
                Err(cur) => old = cur,
            }
        }
    }

    pub fn try_rlock(&self) -> bool {
        let state = self.state();
        let mut old = state.load(Ordering::Relaxed);
        loop {
            let o = RwState(old);
            if o.writers() != 0 {
                return false;
            }
            let new = o.with_readers(o.readers() + 1);
            match state.compare_exchange_weak(old, new.0, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(cur) => old = cur,
            }
        }
    }

    /// Release the exclusive lock. Parked readers are admitted as a group;
    /// otherwise the next writer is woken.
    ///
    /// # Panics
    /// If no writer holds the lock.
    pub fn unlock(&self) -> Result<()> {
        let state = self.state();
        let mut old = state.load(Ordering::Relaxed);
        let new = loop {
            let o = RwState(old);
            if o.writers() == 0 {
                panic!("unlock of unlocked mutex");
            }
            let mut n = o.with_writers(o.writers() - 1);
            if o.waiting_readers() > 0 {
                n = n
                    .with_readers(o.readers() + o.waiting_readers())
                    .with_waiting_readers(0);
            }
            match state.compare_exchange_weak(old, n.0, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => break n,
                Err(cur) => old = cur,
            }
        };
        if new.readers() > 0 {
            self.readers.wake(new.readers() as u32)?;
        } else if new.writers() > 0 {
            self.writers.wake(1)?;
        }
        Ok(())
    }

    /// # Panics
    /// If no reader holds the lock.
    pub fn runlock(&self) -> Result<()> {
        let new = RwState(self.state().fetch_sub(1, Ordering::Release).wrapping_sub(1));
        if new.readers() == FIELD_MASK {
            panic!("unlock of unlocked mutex");
        }
        if new.readers() == 0 && new.writers() > 0 {
            self.writers.wake(1)?;
        }
        Ok(())
    }
}
