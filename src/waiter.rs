// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Pluggable wait/wake backends for the lightweight primitives. A backend
// parks the calling thread until woken and wakes parked threads; the
// lightweight algorithms own the shared state word and decide when to call
// it.

use std::time::{Duration, Instant};

use crate::error::Result;

/// Adaptive backoff: busy spin, then CPU pause hint, then yield, then sleep.
///
/// - k < 4:  busy spin
/// - k < 16: CPU pause hint
/// - k < 32: thread yield
/// - k >= 32: sleep 1ms
#[inline]
pub(crate) fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(1));
        return;
    }
    *k += 1;
}

/// How long an opener waits for a concurrent creator to finish initialising
/// shared state before giving up.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll `ready` with adaptive backoff until it yields a value or `timeout`
/// elapses (`Ok(None)`).
pub(crate) fn poll_until<T>(
    timeout: Duration,
    mut ready: impl FnMut() -> Result<Option<T>>,
) -> Result<Option<T>> {
    let start = Instant::now();
    let mut k = 0u32;
    loop {
        if let Some(v) = ready()? {
            return Ok(Some(v));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        adaptive_yield(&mut k);
    }
}

/// Park / unpark contract used by `LwMutex`, `LwRwMutex` and `LwEvent`.
pub trait WaitWaker {
    /// Park until woken, or return early if the backend can tell that the
    /// state word no longer holds `expected`. `None` waits forever.
    /// An elapsed timeout is reported as [`IpcError::Timeout`](crate::IpcError::Timeout).
    fn wait(&self, expected: u32, timeout: Option<Duration>) -> Result<()>;

    /// Wake up to `n` parked threads; returns how many were (or may have
    /// been) woken.
    fn wake(&self, n: u32) -> Result<usize>;
}

/// Never parks: `wait` yields the CPU once and reports success, callers
/// re-check their state word. Used by `SpinMutex`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWaiter;

impl WaitWaker for SpinWaiter {
    fn wait(&self, _expected: u32, timeout: Option<Duration>) -> Result<()> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(crate::IpcError::Timeout);
        }
        std::thread::yield_now();
        Ok(())
    }

    fn wake(&self, n: u32) -> Result<usize> {
        Ok(n as usize)
    }
}

/// Counting-semaphore backend: every `wake(n)` posts `n` tokens and every
/// `wait` consumes one, so wakes are never lost.
pub struct SemaWaiter {
    sem: crate::semaphore::NamedSemaphore,
}

impl SemaWaiter {
    pub fn new(sem: crate::semaphore::NamedSemaphore) -> Self {
        Self { sem }
    }

    pub fn semaphore(&self) -> &crate::semaphore::NamedSemaphore {
        &self.sem
    }
}

impl WaitWaker for SemaWaiter {
    fn wait(&self, _expected: u32, timeout: Option<Duration>) -> Result<()> {
        self.sem.wait_for(timeout)
    }

    fn wake(&self, n: u32) -> Result<usize> {
        self.sem.signal(n)?;
        Ok(n as usize)
    }
}

/// Futex backend over a 32-bit word in shared memory.
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub struct FutexWaiter {
    addr: *const std::sync::atomic::AtomicU32,
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
unsafe impl Send for FutexWaiter {}
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
unsafe impl Sync for FutexWaiter {}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
impl FutexWaiter {
    /// # Safety
    /// `addr` must stay valid (mapped) for the lifetime of the waiter.
    pub unsafe fn new(addr: *const std::sync::atomic::AtomicU32) -> Self {
        Self { addr }
    }
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
impl WaitWaker for FutexWaiter {
    fn wait(&self, expected: u32, timeout: Option<Duration>) -> Result<()> {
        crate::platform::futex_wait(unsafe { &*self.addr }, expected, timeout)
    }

    fn wake(&self, n: u32) -> Result<usize> {
        crate::platform::futex_wake(unsafe { &*self.addr }, n)
    }
}

/// Auto-reset kernel event backend. `wake` sets the event regardless of
/// `n`, so it only suits algorithms that wake one thread at a time.
#[cfg(windows)]
pub struct EventWaiter {
    event: crate::platform::WinEvent,
}

#[cfg(windows)]
impl EventWaiter {
    pub fn new(event: crate::platform::WinEvent) -> Self {
        Self { event }
    }
}

#[cfg(windows)]
impl WaitWaker for EventWaiter {
    fn wait(&self, _expected: u32, timeout: Option<Duration>) -> Result<()> {
        self.event.wait(timeout)
    }

    fn wake(&self, _n: u32) -> Result<usize> {
        self.event.set()?;
        Ok(1)
    }
}
