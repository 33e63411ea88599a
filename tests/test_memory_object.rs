// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named memory objects: lifecycle, open-or-create intents and cross-handle
// visibility.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use ipckit::{
    is_transient, IpcError, MapMode, MappedRegion, MemoryObject, OpenFlags, OpenMode, DEFAULT_PERM,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

#[test]
fn create_sized() {
    let name = unique_name("mo_create");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let obj = MemoryObject::with_size(&name, OpenMode::Create.into(), DEFAULT_PERM, 1024)
        .expect("create");
    assert!(obj.created());
    assert_eq!(obj.name(), name);
    assert_eq!(obj.size().unwrap(), 1024);
    obj.destroy().expect("destroy");
}

#[test]
fn open_missing_is_not_found() {
    let name = unique_name("mo_missing");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let err = MemoryObject::new(&name, OpenMode::Open.into(), DEFAULT_PERM).unwrap_err();
    assert!(matches!(err, IpcError::NotFound), "{err:?}");
    assert!(!is_transient(&err));
}

#[test]
fn create_existing_is_already_exists() {
    let name = unique_name("mo_exists");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let first = MemoryObject::new(&name, OpenMode::Create.into(), DEFAULT_PERM).expect("create");
    let err = MemoryObject::new(&name, OpenMode::Create.into(), DEFAULT_PERM).unwrap_err();
    assert!(matches!(err, IpcError::AlreadyExists), "{err:?}");
    first.destroy().unwrap();
}

#[test]
fn create_or_open_reports_creator() {
    let name = unique_name("mo_both");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let a = MemoryObject::with_size(&name, OpenMode::CreateOrOpen.into(), DEFAULT_PERM, 64)
        .expect("first");
    let b = MemoryObject::with_size(&name, OpenMode::CreateOrOpen.into(), DEFAULT_PERM, 4096)
        .expect("second");
    assert!(a.created());
    assert!(!b.created());
    // An existing object keeps its size.
    assert_eq!(b.size().unwrap(), 64);
    a.destroy().unwrap();
}

#[test]
fn flags_select_intent() {
    let name = unique_name("mo_flags");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let create = OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::EXCL;
    let obj = MemoryObject::new(&name, create, 0o600).expect("create");
    assert!(obj.created());

    let err = MemoryObject::new(&name, OpenFlags::READ_WRITE | OpenFlags::EXCL, 0o600).unwrap_err();
    assert!(matches!(err, IpcError::InvalidFlags));
    obj.destroy().unwrap();
}

#[test]
fn invalid_names_rejected() {
    for bad in ["", "a/b", "a\\b"] {
        let err = MemoryObject::new(bad, OpenMode::CreateOrOpen.into(), DEFAULT_PERM).unwrap_err();
        assert!(matches!(err, IpcError::InvalidName(_)), "{bad:?}: {err:?}");
    }
    let long = "n".repeat(256);
    assert!(matches!(
        MemoryObject::new(&long, OpenMode::CreateOrOpen.into(), DEFAULT_PERM),
        Err(IpcError::InvalidName(_))
    ));
}

#[test]
fn invalid_permissions_rejected() {
    let name = unique_name("mo_perm");
    let err = MemoryObject::new(&name, OpenMode::Create.into(), 0o1777).unwrap_err();
    assert!(matches!(err, IpcError::InvalidPermissions));
}

#[test]
fn resize_visible_to_peer() {
    let name = unique_name("mo_resize");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let a = MemoryObject::with_size(&name, OpenMode::Create.into(), DEFAULT_PERM, 100).unwrap();
    let b = MemoryObject::new(&name, OpenMode::Open.into(), DEFAULT_PERM).unwrap();
    a.resize(8192).unwrap();
    assert_eq!(b.size().unwrap(), 8192);
    a.destroy().unwrap();
}

#[test]
fn resize_read_only_handle_rejected() {
    let name = unique_name("mo_ro_resize");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let a = MemoryObject::with_size(&name, OpenMode::Create.into(), DEFAULT_PERM, 100).unwrap();
    let ro = MemoryObject::new(&name, OpenFlags::READ_ONLY, DEFAULT_PERM).unwrap();
    assert!(matches!(ro.resize(200), Err(IpcError::InvalidFlags)));
    a.destroy().unwrap();
}

#[test]
fn destroy_absent_name_succeeds() {
    let name = unique_name("mo_destroy_twice");
    MemoryObject::destroy_by_name(&name).expect("first");
    MemoryObject::destroy_by_name(&name).expect("second");
}

#[test]
fn close_keeps_object() {
    let name = unique_name("mo_close");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let a = MemoryObject::with_size(&name, OpenMode::Create.into(), DEFAULT_PERM, 32).unwrap();
    a.close().unwrap();
    let b = MemoryObject::new(&name, OpenMode::Open.into(), DEFAULT_PERM).expect("still there");
    assert_eq!(b.size().unwrap(), 32);
    b.destroy().unwrap();
    assert!(matches!(
        MemoryObject::new(&name, OpenMode::Open.into(), DEFAULT_PERM),
        Err(IpcError::NotFound)
    ));
}

#[test]
fn racing_create_or_open_has_one_creator() {
    let name = unique_name("mo_race");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let name = name.clone();
            thread::spawn(move || {
                MemoryObject::new(&name, OpenMode::CreateOrOpen.into(), DEFAULT_PERM)
                    .expect("create or open")
                    .created()
            })
        })
        .collect();
    let creators = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&c| c)
        .count();
    assert_eq!(creators, 1);
    MemoryObject::destroy_by_name(&name).unwrap();
}

// Two independent handles stand in for two processes.
#[test]
fn shared_memory_round_trip() {
    let name = unique_name("mo_o");
    MemoryObject::destroy_by_name(&name).expect("clear");

    let obj = MemoryObject::with_size(&name, OpenMode::Create.into(), DEFAULT_PERM, 4096).unwrap();
    let writer = thread::spawn({
        let name = name.clone();
        move || {
            let obj = MemoryObject::new(&name, OpenMode::Open.into(), DEFAULT_PERM).unwrap();
            let mut region = MappedRegion::new(&obj, MapMode::ReadWrite, 0, 4096).unwrap();
            for (i, b) in region.data_mut().iter_mut().enumerate() {
                *b = (i & 0xFF) as u8;
            }
            region.flush(false).unwrap();
        }
    });
    writer.join().unwrap();

    let reader = MappedRegion::new(&obj, MapMode::ReadOnly, 128, 256).unwrap();
    assert_eq!(reader.size(), 256);
    for (k, &b) in reader.data().iter().enumerate() {
        assert_eq!(b, ((128 + k) & 0xFF) as u8);
    }
    drop(reader);
    obj.destroy().unwrap();
}
