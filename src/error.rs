// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy shared by every primitive in the crate.

use std::io;

/// Failure kinds surfaced by named objects, lightweight primitives and queues.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// `create-only` open of a name that is already registered.
    #[error("object already exists")]
    AlreadyExists,
    /// `open-only` open of a name that is not registered.
    #[error("object not found")]
    NotFound,
    #[error("invalid object name {0:?}")]
    InvalidName(String),
    #[error("invalid open flags")]
    InvalidFlags,
    #[error("invalid permissions")]
    InvalidPermissions,
    #[error("invalid length")]
    InvalidLength,
    /// Non-blocking send on a full queue.
    #[error("queue is full")]
    QueueFull,
    /// Non-blocking receive on an empty queue.
    #[error("queue is empty")]
    QueueEmpty,
    #[error("operation timed out")]
    Timeout,
    #[error("message too long")]
    MessageTooLong,
    #[error("too many waiters")]
    TooManyWaiters,
    /// An OS call failed. `syscall` names the call.
    #[error("{syscall}: {source}")]
    Os {
        syscall: &'static str,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, IpcError>;

impl IpcError {
    /// Wrap an OS error, folding "exists" / "not found" codes into the
    /// lifecycle variants so the open-or-create loop can match on them.
    pub fn os(syscall: &'static str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AlreadyExists => IpcError::AlreadyExists,
            io::ErrorKind::NotFound => IpcError::NotFound,
            _ => IpcError::Os { syscall, source },
        }
    }

    /// Wrap `errno` / `GetLastError` of the calling thread.
    pub fn last_os(syscall: &'static str) -> Self {
        Self::os(syscall, io::Error::last_os_error())
    }

    /// Wrap a raw OS error code (pthread-style return values).
    pub fn from_raw_os(syscall: &'static str, code: i32) -> Self {
        Self::os(syscall, io::Error::from_raw_os_error(code))
    }

    /// `true` for failures a caller may simply retry: queue full / empty and
    /// timeouts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IpcError::QueueFull | IpcError::QueueEmpty | IpcError::Timeout
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, IpcError::Timeout)
    }

    /// The raw OS error code, if this error wraps one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            IpcError::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Free-function form of [`IpcError::is_transient`].
pub fn is_transient(err: &IpcError) -> bool {
    err.is_transient()
}

impl From<IpcError> for io::Error {
    fn from(err: IpcError) -> Self {
        let kind = match &err {
            IpcError::AlreadyExists => io::ErrorKind::AlreadyExists,
            IpcError::NotFound => io::ErrorKind::NotFound,
            IpcError::InvalidName(_)
            | IpcError::InvalidFlags
            | IpcError::InvalidPermissions
            | IpcError::InvalidLength
            | IpcError::MessageTooLong => io::ErrorKind::InvalidInput,
            IpcError::QueueFull | IpcError::QueueEmpty => io::ErrorKind::WouldBlock,
            IpcError::Timeout => io::ErrorKind::TimedOut,
            IpcError::TooManyWaiters => io::ErrorKind::Other,
            IpcError::Os { source, .. } => source.kind(),
        };
        match err {
            IpcError::Os { source, .. } => source,
            other => io::Error::new(kind, other),
        }
    }
}
