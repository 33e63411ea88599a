// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of the OS-facing pieces: file-emulated and
// paging-file memory objects, MapViewOfFile, named semaphores and events.

use std::fs::File;
use std::io;
use std::os::windows::io::AsRawHandle;
use std::ptr;
use std::sync::OnceLock;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, FALSE, HANDLE, INVALID_HANDLE_VALUE,
    WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, FlushViewOfFile, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile,
    VirtualQuery, FILE_MAP_ALL_ACCESS, FILE_MAP_COPY, FILE_MAP_READ, FILE_MAP_WRITE,
    MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_PROTECTION_FLAGS, PAGE_READONLY,
    PAGE_READWRITE, PAGE_WRITECOPY,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows_sys::Win32::System::Threading::{
    CreateEventW, CreateSemaphoreW, OpenEventW, OpenSemaphoreW, ReleaseSemaphore, SetEvent,
    WaitForSingleObject, EVENT_ALL_ACCESS, INFINITE, SEMAPHORE_ALL_ACCESS,
};

use crate::error::{IpcError, Result};
use crate::mmap::MapMode;
use crate::shm_name;

/// Handle type a memory object keeps open.
pub type RawObject = File;

/// What `MapViewOfFile` is asked to map.
#[derive(Clone, Copy)]
pub enum MapSource<'a> {
    /// A regular file; an intermediate mapping object is created per map.
    File(&'a File),
    /// A paging-file section created by `CreateFileMappingW`.
    Section(HANDLE),
}

/// Encode a name as a null-terminated wide string for Win32 APIs.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn last_error(syscall: &'static str) -> IpcError {
    IpcError::last_os(syscall)
}

pub fn current_pid() -> u32 {
    std::process::id()
}

fn wait_ms(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => INFINITE,
        Some(d) => d.as_millis().min((INFINITE - 1) as u128) as u32,
    }
}

/// Owned kernel handle, closed on drop.
pub struct OwnedHandle(HANDLE);

unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CloseHandle(self.0) };
        }
    }
}

/// Shared create/open step for named kernel objects: `CreateXxxW` reports an
/// existing object through `GetLastError`, which create-only turns into
/// `AlreadyExists`.
fn checked_create(handle: HANDLE, syscall: &'static str) -> Result<OwnedHandle> {
    if handle.is_null() {
        return Err(last_error(syscall));
    }
    if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
        unsafe { CloseHandle(handle) };
        return Err(IpcError::AlreadyExists);
    }
    Ok(OwnedHandle(handle))
}

fn checked_open(handle: HANDLE, syscall: &'static str) -> Result<OwnedHandle> {
    if handle.is_null() {
        return Err(last_error(syscall));
    }
    Ok(OwnedHandle(handle))
}

// ---------------------------------------------------------------------------
// Memory objects (file emulation under <TMP>/ipckit/)
// ---------------------------------------------------------------------------

pub fn open_memory_object(name: &str, create: bool, writable: bool, _perm: u32) -> Result<File> {
    let path = shm_name::tmp_path(name)?;
    let mut opts = std::fs::OpenOptions::new();
    opts.read(true).write(writable || create);
    if create {
        opts.create_new(true);
    }
    opts.open(&path)
        .map_err(|e| IpcError::os(if create { "CreateFileW" } else { "OpenFileW" }, e))
}

pub fn destroy_memory_object(name: &str) -> Result<()> {
    match std::fs::remove_file(shm_name::tmp_dir().join(name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IpcError::os("DeleteFileW", e)),
    }
}

pub fn object_size(file: &File) -> Result<u64> {
    file.metadata()
        .map(|m| m.len())
        .map_err(|e| IpcError::os("GetFileSizeEx", e))
}

pub fn resize_object(file: &File, size: u64) -> Result<()> {
    file.set_len(size).map_err(|e| IpcError::os("SetEndOfFile", e))
}

pub fn map_source(file: &File) -> MapSource<'_> {
    MapSource::File(file)
}

/// Sections do not enforce object bounds before `MapViewOfFile`.
pub const ENFORCES_MAP_BOUNDS: bool = false;

// ---------------------------------------------------------------------------
// Native paging-file sections
// ---------------------------------------------------------------------------

/// A paging-file backed section. It cannot be resized and disappears when the
/// last handle closes.
pub struct NativeSection {
    handle: OwnedHandle,
}

impl NativeSection {
    pub fn create(name: &str, size: u64) -> Result<Self> {
        let wide = to_wide(name);
        let h = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                (size >> 32) as u32,
                size as u32,
                wide.as_ptr(),
            )
        };
        Ok(Self {
            handle: checked_create(h, "CreateFileMappingW")?,
        })
    }

    pub fn open(name: &str, writable: bool) -> Result<Self> {
        let wide = to_wide(name);
        let access = if writable { FILE_MAP_ALL_ACCESS } else { FILE_MAP_READ };
        let h = unsafe { OpenFileMappingW(access, FALSE, wide.as_ptr()) };
        Ok(Self {
            handle: checked_open(h, "OpenFileMappingW")?,
        })
    }

    pub fn source(&self) -> MapSource<'_> {
        MapSource::Section(self.handle.raw())
    }

    /// Size of the section, discovered by mapping and querying a view.
    pub fn size(&self) -> Result<u64> {
        let view = unsafe { MapViewOfFile(self.handle.raw(), FILE_MAP_READ, 0, 0, 0) };
        if view.Value.is_null() {
            return Err(last_error("MapViewOfFile"));
        }
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            VirtualQuery(
                view.Value,
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        let err = (ret == 0).then(|| last_error("VirtualQuery"));
        unsafe { UnmapViewOfFile(view) };
        match err {
            Some(e) => Err(e),
            None => Ok(info.RegionSize as u64),
        }
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

pub fn mmap_offset_multiple() -> usize {
    static GRANULARITY: OnceLock<usize> = OnceLock::new();
    *GRANULARITY.get_or_init(|| {
        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        (info.dwPageSize as usize).max(info.dwAllocationGranularity as usize)
    })
}

fn protection(mode: MapMode) -> (PAGE_PROTECTION_FLAGS, u32) {
    match mode {
        MapMode::ReadOnly | MapMode::ReadPrivate => (PAGE_READONLY, FILE_MAP_READ),
        MapMode::ReadWrite => (PAGE_READWRITE, FILE_MAP_WRITE),
        MapMode::CopyOnWrite => (PAGE_WRITECOPY, FILE_MAP_COPY),
    }
}

pub fn map(src: MapSource<'_>, offset: u64, len: usize, mode: MapMode) -> Result<*mut u8> {
    let (prot, access) = protection(mode);
    let map_view = |section: HANDLE| {
        let view = unsafe {
            MapViewOfFile(section, access, (offset >> 32) as u32, offset as u32, len)
        };
        if view.Value.is_null() {
            return Err(last_error("MapViewOfFile"));
        }
        Ok(view.Value as *mut u8)
    };
    match src {
        MapSource::Section(h) => map_view(h),
        MapSource::File(file) => {
            // Intermediate mapping object, closed once the view exists.
            let h = unsafe {
                CreateFileMappingW(
                    file.as_raw_handle() as HANDLE,
                    ptr::null(),
                    prot,
                    0,
                    0,
                    ptr::null(),
                )
            };
            let section = checked_open(h, "CreateFileMappingW")?;
            map_view(section.raw())
        }
    }
}

/// # Safety
/// `mem` must be a view returned by [`map`].
pub unsafe fn unmap(mem: *mut u8, _len: usize) -> Result<()> {
    if UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: mem as *mut _ }) == 0 {
        return Err(last_error("UnmapViewOfFile"));
    }
    Ok(())
}

/// # Safety
/// `mem`/`len` must describe part of a live view.
pub unsafe fn flush(mem: *mut u8, len: usize, _asynchronous: bool) -> Result<()> {
    if FlushViewOfFile(mem as *const _, len) == 0 {
        return Err(last_error("FlushViewOfFile"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Semaphores
// ---------------------------------------------------------------------------

pub struct WinSemaphore {
    handle: OwnedHandle,
}

impl WinSemaphore {
    pub fn create(name: &str, initial: u32, max: u32) -> Result<Self> {
        let wide = to_wide(name);
        let h = unsafe {
            CreateSemaphoreW(ptr::null(), initial as i32, max as i32, wide.as_ptr())
        };
        Ok(Self {
            handle: checked_create(h, "CreateSemaphoreW")?,
        })
    }

    pub fn open(name: &str) -> Result<Self> {
        let wide = to_wide(name);
        let h = unsafe { OpenSemaphoreW(SEMAPHORE_ALL_ACCESS, FALSE, wide.as_ptr()) };
        Ok(Self {
            handle: checked_open(h, "OpenSemaphoreW")?,
        })
    }

    pub fn signal(&self, n: u32) -> Result<()> {
        if unsafe { ReleaseSemaphore(self.handle.raw(), n as i32, ptr::null_mut()) } == 0 {
            return Err(last_error("ReleaseSemaphore"));
        }
        Ok(())
    }

    pub fn try_wait(&self) -> Result<()> {
        self.wait(Some(Duration::ZERO))
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        wait_handle(self.handle.raw(), timeout)
    }
}

// Alertable waits are never used, so there is nothing to restart.
fn wait_handle(h: HANDLE, timeout: Option<Duration>) -> Result<()> {
    match unsafe { WaitForSingleObject(h, wait_ms(timeout)) } {
        WAIT_OBJECT_0 => Ok(()),
        WAIT_TIMEOUT => Err(IpcError::Timeout),
        _ => Err(last_error("WaitForSingleObject")),
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Auto-reset named kernel event.
pub struct WinEvent {
    handle: OwnedHandle,
}

impl WinEvent {
    pub fn create(name: &str, initial: bool) -> Result<Self> {
        let wide = to_wide(name);
        let h = unsafe {
            CreateEventW(ptr::null(), FALSE, initial as i32, wide.as_ptr())
        };
        Ok(Self {
            handle: checked_create(h, "CreateEventW")?,
        })
    }

    pub fn open(name: &str) -> Result<Self> {
        let wide = to_wide(name);
        let h = unsafe { OpenEventW(EVENT_ALL_ACCESS, FALSE, wide.as_ptr()) };
        Ok(Self {
            handle: checked_open(h, "OpenEventW")?,
        })
    }

    pub fn set(&self) -> Result<()> {
        if unsafe { SetEvent(self.handle.raw()) } == 0 {
            return Err(last_error("SetEvent"));
        }
        Ok(())
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        wait_handle(self.handle.raw(), timeout)
    }
}
