// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Three-state mutex over a 32-bit shared cell (Drepper, "Futexes Are
// Tricky", mutex #2). The cell lives in memory this type does not own.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use crate::error::{IpcError, Result};
use crate::platform::remaining;
use crate::waiter::WaitWaker;

/// Lock attempts made before a contender parks.
pub const SPIN_COUNT: usize = 100;

pub(crate) const UNLOCKED: i32 = 0;
pub(crate) const LOCKED_NO_WAITERS: i32 = 1;
pub(crate) const LOCKED_HAVE_WAITERS: i32 = 2;

/// Size of the shared cell in bytes.
pub const LW_MUTEX_SIZE: usize = std::mem::size_of::<i32>();

/// A mutex whose whole state is one `i32` in shared memory, parking through
/// the backend `W`.
pub struct LwMutex<W> {
    state: *const AtomicI32,
    waiter: W,
}

unsafe impl<W: Send> Send for LwMutex<W> {}
unsafe impl<W: Sync> Sync for LwMutex<W> {}

impl<W: WaitWaker> LwMutex<W> {
    /// # Safety
    /// `state` must point to a 4-byte aligned cell that stays mapped for the
    /// lifetime of the returned value.
    pub unsafe fn new(state: *const AtomicI32, waiter: W) -> Self {
        Self { state, waiter }
    }

    fn state(&self) -> &AtomicI32 {
        unsafe { &*self.state }
    }

    /// Reset the cell to unlocked. Only valid while no peer uses it.
    pub fn init(&self) {
        self.state().store(UNLOCKED, Ordering::Release);
    }

    pub fn try_lock(&self) -> bool {
        self.state()
            .compare_exchange(UNLOCKED, LOCKED_NO_WAITERS, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn lock(&self) -> Result<()> {
        self.lock_for(None)
    }

    /// `Ok(false)` when `timeout` elapses first; ownership is not taken.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<bool> {
        match self.lock_for(Some(timeout)) {
            Ok(()) => Ok(true),
            Err(IpcError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn lock_for(&self, timeout: Option<Duration>) -> Result<()> {
        for _ in 0..SPIN_COUNT {
            if self.try_lock() {
                return Ok(());
            }
            std::hint::spin_loop();
        }
        let start = Instant::now();
        while self.state().swap(LOCKED_HAVE_WAITERS, Ordering::Acquire) != UNLOCKED {
            let left = remaining(start, timeout);
            if left.is_some_and(|d| d.is_zero()) {
                return Err(IpcError::Timeout);
            }
            self.waiter.wait(LOCKED_HAVE_WAITERS as u32, left)?;
        }
        Ok(())
    }

    /// # Panics
    /// If the mutex is not locked.
    pub fn unlock(&self) -> Result<()> {
        let state = self.state();
        match state.swap(UNLOCKED, Ordering::Release) {
            UNLOCKED => panic!("unlock of unlocked mutex"),
            LOCKED_NO_WAITERS => return Ok(()),
            _ => {}
        }
        // A new owner that marks the cell as contended takes over the wake.
        for _ in 0..SPIN_COUNT {
            match state.load(Ordering::Relaxed) {
                LOCKED_HAVE_WAITERS => return Ok(()),
                LOCKED_NO_WAITERS => {
                    if state
                        .compare_exchange(
                            LOCKED_NO_WAITERS,
                            LOCKED_HAVE_WAITERS,
                            Ordering::Relaxed,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return Ok(());
                    }
                }
                _ => {}
            }
            std::hint::spin_loop();
        }
        self.waiter.wake(1).map(|_| ())
    }

    pub fn waiter(&self) -> &W {
        &self.waiter
    }
}
