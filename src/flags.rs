// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Open flags and permission words accepted by every named object.

use std::ops::{BitOr, BitOrAssign};

use crate::error::{IpcError, Result};

/// Create / open intent of a named object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create exclusively; fails if the name exists.
    Create,
    /// Open an existing object; fails if it is missing.
    Open,
    /// Create if missing, open if it already exists.
    CreateOrOpen,
}

/// Bit set passed to named-object constructors.
///
/// Access bits (`READ_ONLY`, `WRITE_ONLY`, `READ_WRITE`) are mutually
/// exclusive; `CREATE` / `EXCL` select the open intent; `NON_BLOCK` toggles
/// the per-handle blocking mode of queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0);
    pub const WRITE_ONLY: OpenFlags = OpenFlags(1);
    pub const READ_WRITE: OpenFlags = OpenFlags(2);
    pub const CREATE: OpenFlags = OpenFlags(1 << 3);
    pub const EXCL: OpenFlags = OpenFlags(1 << 4);
    pub const NON_BLOCK: OpenFlags = OpenFlags(1 << 5);

    const ACCESS_MASK: u32 = 0b11;
    const ALL: u32 = Self::ACCESS_MASK | (1 << 3) | (1 << 4) | (1 << 5);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Open intent encoded by the `CREATE` / `EXCL` bits.
    pub fn mode(self) -> Result<OpenMode> {
        match (self.contains(Self::CREATE), self.contains(Self::EXCL)) {
            (true, true) => Ok(OpenMode::Create),
            (true, false) => Ok(OpenMode::CreateOrOpen),
            (false, false) => Ok(OpenMode::Open),
            (false, true) => Err(IpcError::InvalidFlags),
        }
    }

    /// Rejects unknown bits and the reserved access value `0b11`.
    pub fn validate(self) -> Result<()> {
        if self.0 & !Self::ALL != 0 || self.0 & Self::ACCESS_MASK == Self::ACCESS_MASK {
            return Err(IpcError::InvalidFlags);
        }
        self.mode().map(|_| ())
    }

    pub fn is_read_only(self) -> bool {
        self.0 & Self::ACCESS_MASK == Self::READ_ONLY.0
    }

    pub fn is_writable(self) -> bool {
        !self.is_read_only()
    }

    pub fn is_non_blocking(self) -> bool {
        self.contains(Self::NON_BLOCK)
    }

    /// Same flags with the intent replaced by `mode`.
    pub fn with_mode(self, mode: OpenMode) -> OpenFlags {
        let base = self.0 & !(Self::CREATE.0 | Self::EXCL.0);
        OpenFlags(match mode {
            OpenMode::Create => base | Self::CREATE.0 | Self::EXCL.0,
            OpenMode::CreateOrOpen => base | Self::CREATE.0,
            OpenMode::Open => base,
        })
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: OpenFlags) {
        self.0 |= rhs.0;
    }
}

impl From<OpenMode> for OpenFlags {
    fn from(mode: OpenMode) -> Self {
        OpenFlags::READ_WRITE.with_mode(mode)
    }
}

/// Default permission word for named objects (`rw-rw-rw-`).
pub const DEFAULT_PERM: u32 = 0o666;

/// Permission words are plain POSIX `rwxrwxrwx` bits.
pub fn validate_perm(perm: u32) -> Result<()> {
    if perm & !0o777 != 0 {
        return Err(IpcError::InvalidPermissions);
    }
    Ok(())
}

/// Message queues additionally reject every execute bit.
pub fn validate_queue_perm(perm: u32) -> Result<()> {
    validate_perm(perm)?;
    if perm & 0o111 != 0 {
        return Err(IpcError::InvalidPermissions);
    }
    Ok(())
}
