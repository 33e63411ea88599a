// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Maps caller-visible object names into the host namespaces: the tmpfs
// directory on Linux, POSIX shm names on the BSDs, a temp directory for
// file-emulated objects and SysV key files.

use std::path::PathBuf;

use crate::error::{IpcError, Result};

/// Longest accepted object name.
pub const NAME_MAX: usize = 255;

/// Directory (under the system temp dir) for key files and file-emulated
/// memory objects.
pub const TMP_DIR_NAME: &str = "ipckit";

/// Reject names the host namespaces cannot represent.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > NAME_MAX
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(IpcError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// [`validate_name`], also leaving room for the longest suffix
/// (`suffix_max` bytes) a primitive appends when naming its backing objects.
pub fn validate_with_suffix(name: &str, suffix_max: usize) -> Result<()> {
    validate_name(name)?;
    if name.len() + suffix_max > NAME_MAX {
        return Err(IpcError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub(crate) const fn longest(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Fixed-width 16-char lowercase hex.
#[cfg_attr(target_os = "linux", allow(dead_code))]
fn to_hex(val: u64) -> String {
    format!("{val:016x}")
}

/// Maximum length for POSIX shm names (`PSHMNAMLEN` on macOS). 0 disables
/// shortening.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Shorten `full` (which starts with '/') to `SHM_NAME_MAX` bytes as
/// `/<prefix>_<16-hex-fnv>` when it does not fit.
#[cfg_attr(target_os = "linux", allow(dead_code))]
fn shorten(full: String) -> String {
    if SHM_NAME_MAX == 0 || full.len() <= SHM_NAME_MAX {
        return full;
    }
    // 1 (underscore) + 16 (hex hash) + 1 (leading '/')
    let prefix_len = SHM_NAME_MAX.saturating_sub(18);
    let hex = to_hex(fnv1a_64(full.as_bytes()));
    let body = &full[1..];
    let mut take = prefix_len.min(body.len());
    while !body.is_char_boundary(take) {
        take -= 1;
    }
    format!("/{}_{hex}", &body[..take])
}

/// POSIX shm name for `name`.
///
/// Darwin: the name is disambiguated per effective uid with a tab-separated
/// suffix, then shortened to `PSHMNAMLEN`. Other BSDs: a leading '/'.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn posix_shm_name(name: &str) -> String {
    #[cfg(target_vendor = "apple")]
    {
        let euid = unsafe { libc::geteuid() };
        shorten(format!("/{name}\t{euid}"))
    }
    #[cfg(not(target_vendor = "apple"))]
    {
        shorten(format!("/{name}"))
    }
}

/// Directory hosting POSIX shm on this Linux host, probed once.
#[cfg(target_os = "linux")]
pub fn shm_dir() -> &'static std::path::Path {
    use std::sync::OnceLock;
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = std::fs::read_to_string("/proc/mounts")
            .ok()
            .and_then(|t| find_tmpfs_mount(&t, 1, 2))
            .or_else(|| {
                std::fs::read_to_string("/etc/fstab")
                    .ok()
                    .and_then(|t| find_tmpfs_mount(&t, 1, 2))
            })
            .unwrap_or_else(|| PathBuf::from("/dev/shm/"));
        tracing::debug!(dir = %dir.display(), "probed shm directory");
        dir
    })
}

/// Scan a mount table for a tmpfs mount whose mount point names shm.
/// `dir_col` / `type_col` are the whitespace-separated columns holding the
/// mount point and the filesystem type.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn find_tmpfs_mount(table: &str, dir_col: usize, type_col: usize) -> Option<PathBuf> {
    table
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let cols: Vec<&str> = l.split_whitespace().collect();
            match (cols.get(dir_col), cols.get(type_col)) {
                (Some(dir), Some(&"tmpfs")) if dir.ends_with("shm") => Some(PathBuf::from(dir)),
                _ => None,
            }
        })
        .next()
}

/// Backing file of a Linux memory object.
#[cfg(target_os = "linux")]
pub fn shm_path(name: &str) -> PathBuf {
    shm_dir().join(name)
}

/// Private temp directory for key files and emulated objects.
pub fn tmp_dir() -> PathBuf {
    std::env::temp_dir().join(TMP_DIR_NAME)
}

/// Path of a file under [`tmp_dir`], creating the directory on demand.
pub fn tmp_path(name: &str) -> Result<PathBuf> {
    let dir = tmp_dir();
    std::fs::create_dir_all(&dir).map_err(|e| IpcError::os("mkdir", e))?;
    Ok(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_value() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
    }

    #[test]
    fn to_hex_is_fixed_width() {
        assert_eq!(to_hex(0x0123456789abcdef), "0123456789abcdef");
        assert_eq!(to_hex(1).len(), 16);
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(NAME_MAX + 1)).is_err());
        assert!(validate_name(&"x".repeat(NAME_MAX)).is_ok());
        assert!(validate_name("queue.locker").is_ok());
    }

    #[test]
    fn suffix_counts_against_name_max() {
        let name = "x".repeat(NAME_MAX - 4);
        assert!(validate_with_suffix(&name, 4).is_ok());
        assert!(matches!(
            validate_with_suffix(&name, 5),
            Err(IpcError::InvalidName(_))
        ));
        assert!(validate_with_suffix("", 0).is_err());
    }

    #[test]
    fn finds_tmpfs_shm_mount() {
        let mounts = "proc /proc proc rw 0 0\n\
                      tmpfs /run tmpfs rw 0 0\n\
                      tmpfs /run/shm tmpfs rw,nosuid 0 0\n";
        assert_eq!(find_tmpfs_mount(mounts, 1, 2), Some(PathBuf::from("/run/shm")));
        assert_eq!(find_tmpfs_mount("# tmpfs /dev/shm tmpfs\n", 1, 2), None);
    }

    #[test]
    fn shorten_keeps_short_names() {
        assert_eq!(shorten("/short".to_string()), "/short");
    }
}
