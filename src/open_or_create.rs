// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Race-free create/open loop used by every named object.

use crate::error::{IpcError, Result};
use crate::flags::OpenMode;

/// Upper bound on create/open round-trips when a peer keeps destroying and
/// recreating the same name.
pub const OPEN_OR_CREATE_ATTEMPTS: usize = 16;

/// Run `creator` according to `mode` and report whether the object was
/// created by this call.
///
/// `creator(true)` must attempt an exclusive create and fail with
/// [`IpcError::AlreadyExists`] when the name is taken; `creator(false)` must
/// attempt an open and fail with [`IpcError::NotFound`] when it is absent.
/// For [`OpenMode::CreateOrOpen`] those two errors never escape unless the
/// retry budget is exhausted.
pub fn open_or_create<T, F>(mode: OpenMode, mut creator: F) -> Result<(T, bool)>
where
    F: FnMut(bool) -> Result<T>,
{
    match mode {
        OpenMode::Create => creator(true).map(|v| (v, true)),
        OpenMode::Open => creator(false).map(|v| (v, false)),
        OpenMode::CreateOrOpen => {
            let mut last = IpcError::NotFound;
            for _ in 0..OPEN_OR_CREATE_ATTEMPTS {
                match creator(true) {
                    Err(IpcError::AlreadyExists) => {}
                    other => return other.map(|v| (v, true)),
                }
                match creator(false) {
                    Err(IpcError::NotFound) => last = IpcError::NotFound,
                    other => return other.map(|v| (v, false)),
                }
            }
            tracing::debug!(
                attempts = OPEN_OR_CREATE_ATTEMPTS,
                "open-or-create retry budget exhausted"
            );
            Err(last)
        }
    }
}
