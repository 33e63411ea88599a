// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the OS-facing pieces: memory-object files,
// mmap/msync, futex-style wait/wake and System V semaphores.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::error::{IpcError, Result};
use crate::mmap::MapMode;
use crate::shm_name;

use super::remaining;

/// Handle type a memory object keeps open.
pub type RawObject = File;

/// Borrowed descriptor handed to `mmap`.
pub type MapSource<'a> = BorrowedFd<'a>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

pub fn current_pid() -> u32 {
    std::process::id()
}

// ---------------------------------------------------------------------------
// Memory objects
// ---------------------------------------------------------------------------

/// One creator step of the open-or-create protocol: exclusively create
/// (`create == true`) or open the object backing `name`.
#[cfg(target_os = "linux")]
pub fn open_memory_object(name: &str, create: bool, writable: bool, perm: u32) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let path = shm_name::shm_path(name);
    let mut opts = std::fs::OpenOptions::new();
    opts.read(true).write(writable || create).mode(perm);
    if create {
        opts.create_new(true);
    }
    let file = opts
        .open(&path)
        .map_err(|e| IpcError::os(if create { "creat" } else { "open" }, e))?;
    if create {
        // umask may have masked bits off.
        unsafe { libc::fchmod(file.as_raw_fd(), perm as libc::mode_t) };
    }
    Ok(file)
}

#[cfg(not(target_os = "linux"))]
pub fn open_memory_object(name: &str, create: bool, writable: bool, perm: u32) -> Result<File> {
    use std::ffi::CString;
    use std::os::fd::FromRawFd;

    let posix_name = shm_name::posix_shm_name(name);
    let c_name = CString::new(posix_name).map_err(|_| IpcError::InvalidName(name.to_string()))?;
    let mut oflag = if writable || create { libc::O_RDWR } else { libc::O_RDONLY };
    if create {
        oflag |= libc::O_CREAT | libc::O_EXCL;
    }
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), oflag, perm as libc::c_uint) };
    if fd == -1 {
        return Err(IpcError::last_os("shm_open"));
    }
    if create {
        unsafe { libc::fchmod(fd, perm as libc::mode_t) };
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Remove `name` from the host namespace. Absent names are not an error.
#[cfg(target_os = "linux")]
pub fn destroy_memory_object(name: &str) -> Result<()> {
    match std::fs::remove_file(shm_name::shm_path(name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IpcError::os("unlink", e)),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn destroy_memory_object(name: &str) -> Result<()> {
    use std::ffi::CString;

    let c_name = CString::new(shm_name::posix_shm_name(name))
        .map_err(|_| IpcError::InvalidName(name.to_string()))?;
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } == -1 {
        return match IpcError::last_os("shm_unlink") {
            IpcError::NotFound => Ok(()),
            e => Err(e),
        };
    }
    Ok(())
}

pub fn object_size(file: &File) -> Result<u64> {
    file.metadata()
        .map(|m| m.len())
        .map_err(|e| IpcError::os("fstat", e))
}

pub fn resize_object(file: &File, size: u64) -> Result<()> {
    file.set_len(size).map_err(|e| IpcError::os("ftruncate", e))
}

pub fn map_source(file: &File) -> MapSource<'_> {
    use std::os::fd::AsFd;
    file.as_fd()
}

/// Files are sized, so the mapping length can be checked up front.
pub const ENFORCES_MAP_BOUNDS: bool = true;

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// `mmap` offsets must be a multiple of this value.
pub fn mmap_offset_multiple() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if v > 0 {
            v as usize
        } else {
            4096
        }
    })
}

fn prot_and_flags(mode: MapMode) -> (libc::c_int, libc::c_int) {
    match mode {
        MapMode::ReadOnly => (libc::PROT_READ, libc::MAP_SHARED),
        MapMode::ReadPrivate => (libc::PROT_READ, libc::MAP_PRIVATE),
        MapMode::ReadWrite => (libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED),
        MapMode::CopyOnWrite => (libc::PROT_READ | libc::PROT_WRITE, libc::MAP_PRIVATE),
    }
}

/// Map `len` bytes at the (already aligned) `offset` of `src`.
pub fn map(src: MapSource<'_>, offset: u64, len: usize, mode: MapMode) -> Result<*mut u8> {
    let (prot, flags) = prot_and_flags(mode);
    let mem = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            prot,
            flags,
            src.as_raw_fd(),
            offset as libc::off_t,
        )
    };
    if mem == libc::MAP_FAILED {
        return Err(IpcError::last_os("mmap"));
    }
    Ok(mem as *mut u8)
}

/// # Safety
/// `mem`/`len` must describe a mapping returned by [`map`].
pub unsafe fn unmap(mem: *mut u8, len: usize) -> Result<()> {
    if libc::munmap(mem as *mut libc::c_void, len) != 0 {
        return Err(IpcError::last_os("munmap"));
    }
    Ok(())
}

/// # Safety
/// `mem`/`len` must describe (a page-aligned part of) a live mapping.
pub unsafe fn flush(mem: *mut u8, len: usize, asynchronous: bool) -> Result<()> {
    let flags = if asynchronous { libc::MS_ASYNC } else { libc::MS_SYNC };
    if libc::msync(mem as *mut libc::c_void, len, flags) != 0 {
        return Err(IpcError::last_os("msync"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Futex
// ---------------------------------------------------------------------------

/// Park until `addr` is woken, unless it no longer holds `expected`.
///
/// A changed value is reported as success. `EINTR` re-issues the wait with
/// the remaining time.
#[cfg(target_os = "linux")]
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> Result<()> {
    let start = Instant::now();
    loop {
        let ts = remaining(start, timeout).map(to_timespec);
        let ts_ptr = ts
            .as_ref()
            .map_or(ptr::null(), |t| t as *const libc::timespec);
        // Shared (non-private) futex: peers live in other processes.
        let r = unsafe {
            libc::syscall(
                libc::SYS_futex,
                addr.as_ptr(),
                libc::FUTEX_WAIT,
                expected,
                ts_ptr,
                ptr::null::<u32>(),
                0u32,
            )
        };
        if r == 0 {
            return Ok(());
        }
        match errno() {
            libc::EAGAIN => return Ok(()),
            libc::EINTR => continue,
            libc::ETIMEDOUT => return Err(IpcError::Timeout),
            e => return Err(IpcError::from_raw_os("futex", e)),
        }
    }
}

/// Wake up to `n` threads parked on `addr`; returns how many were woken.
#[cfg(target_os = "linux")]
pub fn futex_wake(addr: &AtomicU32, n: u32) -> Result<usize> {
    let n = n.min(i32::MAX as u32) as libc::c_int;
    let r = unsafe { libc::syscall(libc::SYS_futex, addr.as_ptr(), libc::FUTEX_WAKE, n) };
    if r < 0 {
        return Err(IpcError::last_os("futex"));
    }
    Ok(r as usize)
}

#[cfg(target_os = "freebsd")]
mod umtx {
    extern "C" {
        pub fn _umtx_op(
            obj: *mut libc::c_void,
            op: libc::c_int,
            val: libc::c_ulong,
            uaddr: *mut libc::c_void,
            uaddr2: *mut libc::c_void,
        ) -> libc::c_int;
    }

    pub const UMTX_OP_WAKE: libc::c_int = 3;
    pub const UMTX_OP_WAIT_UINT: libc::c_int = 11;
}

#[cfg(target_os = "freebsd")]
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> Result<()> {
    let start = Instant::now();
    loop {
        let mut ts = remaining(start, timeout).map(to_timespec);
        // A null uaddr makes uaddr2 a relative timespec.
        let ts_ptr = ts
            .as_mut()
            .map_or(ptr::null_mut(), |t| t as *mut libc::timespec as *mut libc::c_void);
        let r = unsafe {
            umtx::_umtx_op(
                addr.as_ptr() as *mut libc::c_void,
                umtx::UMTX_OP_WAIT_UINT,
                expected as libc::c_ulong,
                ptr::null_mut(),
                ts_ptr,
            )
        };
        if r == 0 {
            return Ok(());
        }
        match errno() {
            libc::EINTR => continue,
            libc::ETIMEDOUT => return Err(IpcError::Timeout),
            e => return Err(IpcError::from_raw_os("_umtx_op", e)),
        }
    }
}

#[cfg(target_os = "freebsd")]
pub fn futex_wake(addr: &AtomicU32, n: u32) -> Result<usize> {
    let r = unsafe {
        umtx::_umtx_op(
            addr.as_ptr() as *mut libc::c_void,
            umtx::UMTX_OP_WAKE,
            n as libc::c_ulong,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };
    if r != 0 {
        return Err(IpcError::last_os("_umtx_op"));
    }
    // The kernel does not report the count.
    Ok(n as usize)
}

// ---------------------------------------------------------------------------
// System V semaphores
// ---------------------------------------------------------------------------

const SEM_PROJ_ID: libc::c_int = b'i' as libc::c_int;

/// A single System V semaphore addressed by a key derived (via `ftok`) from
/// a file in the private temp directory.
pub struct SysvSemaphore {
    id: libc::c_int,
}

impl SysvSemaphore {
    fn key(name: &str, create: bool, perm: u32) -> Result<libc::key_t> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;
        use std::os::unix::fs::OpenOptionsExt;

        let path = shm_name::tmp_path(&format!("{name}.key"))?;
        if create {
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .mode(perm)
                .open(&path)
                .map_err(|e| IpcError::os("creat", e))?;
        }
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| IpcError::InvalidName(name.to_string()))?;
        let key = unsafe { libc::ftok(c_path.as_ptr(), SEM_PROJ_ID) };
        if key == -1 {
            return Err(IpcError::last_os("ftok"));
        }
        Ok(key)
    }

    /// Exclusively create the semaphore with `initial` as its value.
    pub fn create(name: &str, perm: u32, initial: u32) -> Result<Self> {
        let key = Self::key(name, true, perm)?;
        let flags = libc::IPC_CREAT | libc::IPC_EXCL | (perm as libc::c_int & 0o777);
        let id = unsafe { libc::semget(key, 1, flags) };
        if id == -1 {
            return Err(IpcError::last_os("semget"));
        }
        if unsafe { libc::semctl(id, 0, libc::SETVAL, initial as libc::c_int) } == -1 {
            let err = IpcError::last_os("semctl");
            unsafe { libc::semctl(id, 0, libc::IPC_RMID) };
            return Err(err);
        }
        Ok(Self { id })
    }

    pub fn open(name: &str) -> Result<Self> {
        let key = Self::key(name, false, 0)?;
        let id = unsafe { libc::semget(key, 1, 0) };
        if id == -1 {
            return Err(IpcError::last_os("semget"));
        }
        Ok(Self { id })
    }

    /// Remove the kernel semaphore and its key file.
    pub fn destroy(name: &str) -> Result<()> {
        match Self::open(name) {
            Ok(sem) => {
                if unsafe { libc::semctl(sem.id, 0, libc::IPC_RMID) } == -1 {
                    match IpcError::last_os("semctl") {
                        IpcError::NotFound => {}
                        e if e.raw_os_error() == Some(libc::EINVAL) => {}
                        e => return Err(e),
                    }
                }
            }
            Err(IpcError::NotFound) => {}
            Err(e) => return Err(e),
        }
        let path = shm_name::tmp_dir().join(format!("{name}.key"));
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IpcError::os("unlink", e)),
        }
    }

    fn op(&self, delta: i16, flags: libc::c_short) -> libc::c_int {
        let mut op = libc::sembuf {
            sem_num: 0,
            sem_op: delta,
            sem_flg: flags,
        };
        unsafe { libc::semop(self.id, &mut op, 1) }
    }

    pub fn signal(&self, n: u32) -> Result<()> {
        let mut left = n;
        while left > 0 {
            let chunk = left.min(i16::MAX as u32);
            loop {
                if self.op(chunk as i16, 0) == 0 {
                    break;
                }
                if errno() != libc::EINTR {
                    return Err(IpcError::last_os("semop"));
                }
            }
            left -= chunk;
        }
        Ok(())
    }

    /// Decrement, failing immediately with `Timeout` when the value is 0.
    pub fn try_wait(&self) -> Result<()> {
        loop {
            if self.op(-1, libc::IPC_NOWAIT as libc::c_short) == 0 {
                return Ok(());
            }
            match errno() {
                libc::EINTR => continue,
                libc::EAGAIN => return Err(IpcError::Timeout),
                e => return Err(IpcError::from_raw_os("semop", e)),
            }
        }
    }

    /// Decrement, blocking up to `timeout` (`None` = forever).
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        match timeout {
            None => loop {
                if self.op(-1, 0) == 0 {
                    return Ok(());
                }
                if errno() != libc::EINTR {
                    return Err(IpcError::last_os("semop"));
                }
            },
            Some(d) if d.is_zero() => self.try_wait(),
            Some(d) => self.timed_wait(d),
        }
    }

    #[cfg(all(target_os = "linux", target_pointer_width = "64"))]
    fn timed_wait(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            let ts = to_timespec(timeout.saturating_sub(start.elapsed()));
            let mut op = libc::sembuf {
                sem_num: 0,
                sem_op: -1,
                sem_flg: 0,
            };
            let r = unsafe {
                libc::syscall(
                    libc::SYS_semtimedop,
                    self.id,
                    &mut op as *mut libc::sembuf,
                    1usize,
                    &ts as *const libc::timespec,
                )
            };
            if r == 0 {
                return Ok(());
            }
            match errno() {
                libc::EINTR => continue,
                libc::EAGAIN => return Err(IpcError::Timeout),
                e => return Err(IpcError::from_raw_os("semtimedop", e)),
            }
        }
    }

    // No semtimedop: poll with adaptive backoff.
    #[cfg(not(all(target_os = "linux", target_pointer_width = "64")))]
    fn timed_wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut k = 0u32;
        loop {
            match self.try_wait() {
                Err(IpcError::Timeout) => {}
                other => return other,
            }
            if Instant::now() >= deadline {
                return Err(IpcError::Timeout);
            }
            crate::waiter::adaptive_yield(&mut k);
        }
    }

    pub fn value(&self) -> Result<u32> {
        let v = unsafe { libc::semctl(self.id, 0, libc::GETVAL) };
        if v == -1 {
            return Err(IpcError::last_os("semctl"));
        }
        Ok(v as u32)
    }
}
