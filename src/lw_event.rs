// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Auto-reset event over a 32-bit shared cell. Positive: signaled (at most
// 1). Negative: that many parked waiters. The backend must count wakes.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use crate::error::{IpcError, Result};
use crate::waiter::WaitWaker;

pub const LW_EVENT_SIZE: usize = std::mem::size_of::<i32>();

pub struct LwEvent<W> {
    state: *const AtomicI32,
    waiter: W,
}

unsafe impl<W: Send> Send for LwEvent<W> {}
unsafe impl<W: Sync> Sync for LwEvent<W> {}

impl<W: WaitWaker> LwEvent<W> {
    /// # Safety
    /// `state` must point to a 4-byte aligned cell that stays mapped for the
    /// lifetime of the returned value.
    pub unsafe fn new(state: *const AtomicI32, waiter: W) -> Self {
        Self { state, waiter }
    }

    fn state(&self) -> &AtomicI32 {
        unsafe { &*self.state }
    }

    /// Signal: release one waiter, or leave the event set if nobody waits.
    pub fn set(&self) -> Result<()> {
        let state = self.state();
        let mut old = state.load(Ordering::Relaxed);
        loop {
            if old > 0 {
                return Ok(());
            }
            match state.compare_exchange_weak(old, old + 1, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => break,
                Err(cur) => old = cur,
            }
        }
        if old < 0 {
            self.waiter.wake(1)?;
        }
        Ok(())
    }

    pub fn wait(&self) -> Result<()> {
        self.wait_for(None).map(|_| ())
    }

    /// `Ok(false)` if `timeout` elapsed without a signal. A zero timeout
    /// polls.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.wait_for(Some(timeout))
    }

    fn wait_for(&self, timeout: Option<Duration>) -> Result<bool> {
        let state = self.state();
        let prev = state.fetch_sub(1, Ordering::Acquire);
        if prev > 0 {
            return Ok(true);
        }
        match self.waiter.wait((prev - 1) as u32, timeout) {
            Ok(()) => Ok(true),
            Err(IpcError::Timeout) => self.withdraw(),
            Err(e) => Err(e),
        }
    }

    // Undo the decrement of a timed-out waiter. If a signaller already
    // counted it in, its wake is on the way and is consumed instead.
    fn withdraw(&self) -> Result<bool> {
        let state = self.state();
        let mut cur = state.load(Ordering::Relaxed);
        loop {
            if cur >= 0 {
                self.waiter.wait(cur as u32, None)?;
                return Ok(true);
            }
            match state.compare_exchange_weak(cur, cur + 1, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => {
                    tracing::trace!("event wait timed out");
                    return Ok(false);
                }
                Err(c) => cur = c,
            }
        }
    }
}
