// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Mapped regions: offset fixup, length defaults and bounds, access modes,
// reader/writer adapters.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use ipckit::{
    mmap_offset_multiple, IpcError, MapMode, MappedRegion, MemoryObject, OpenMode, DEFAULT_PERM,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

fn patterned_object(prefix: &str, size: usize) -> MemoryObject {
    let name = unique_name(prefix);
    MemoryObject::destroy_by_name(&name).expect("clear");
    let obj = MemoryObject::with_size(&name, OpenMode::Create.into(), DEFAULT_PERM, size).unwrap();
    let mut region = MappedRegion::new(&obj, MapMode::ReadWrite, 0, size).unwrap();
    for (i, b) in region.data_mut().iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    region.close().unwrap();
    obj
}

#[test]
fn offset_multiple_is_page_sized() {
    let m = mmap_offset_multiple();
    assert!(m.is_power_of_two());
    assert!(m >= 4096);
}

#[test]
fn unaligned_offset_is_hidden() {
    let size = 3 * mmap_offset_multiple();
    let obj = patterned_object("mm_fixup", size);
    for offset in [1usize, 7, 4095, mmap_offset_multiple() + 3] {
        let region = MappedRegion::new(&obj, MapMode::ReadOnly, offset as u64, 100).unwrap();
        assert_eq!(region.size(), 100);
        for (k, &b) in region.data().iter().enumerate() {
            assert_eq!(b, ((offset + k) % 251) as u8, "offset {offset}");
        }
    }
    obj.destroy().unwrap();
}

#[test]
fn zero_length_maps_to_end() {
    let obj = patterned_object("mm_rest", 5000);
    let region = MappedRegion::new(&obj, MapMode::ReadOnly, 1000, 0).unwrap();
    assert_eq!(region.size(), 4000);
    assert_eq!(region.data()[0], (1000 % 251) as u8);
    drop(region);
    obj.destroy().unwrap();
}

#[cfg(unix)]
#[test]
fn out_of_bounds_is_invalid_length() {
    let obj = patterned_object("mm_oob", 4096);
    let err = MappedRegion::new(&obj, MapMode::ReadOnly, 4000, 200).unwrap_err();
    assert!(matches!(err, IpcError::InvalidLength), "{err:?}");
    let err = MappedRegion::new(&obj, MapMode::ReadOnly, 4096, 0).unwrap_err();
    assert!(matches!(err, IpcError::InvalidLength), "{err:?}");
    obj.destroy().unwrap();
}

#[test]
fn flushed_bytes_survive_remap() {
    let name = unique_name("mm_flush");
    MemoryObject::destroy_by_name(&name).expect("clear");
    let obj = MemoryObject::with_size(&name, OpenMode::Create.into(), DEFAULT_PERM, 8192).unwrap();

    let payload = b"bytes that outlive their mapping";
    let mut region = MappedRegion::new(&obj, MapMode::ReadWrite, 5000, 64).unwrap();
    region.data_mut()[..payload.len()].copy_from_slice(payload);
    region.flush(false).unwrap();
    region.close().unwrap();

    let again = MappedRegion::new(&obj, MapMode::ReadOnly, 5000, 64).unwrap();
    assert_eq!(&again.data()[..payload.len()], payload);
    drop(again);
    obj.destroy().unwrap();
}

#[test]
fn copy_on_write_stays_private() {
    let obj = patterned_object("mm_cow", 4096);
    let mut cow = MappedRegion::new(&obj, MapMode::CopyOnWrite, 0, 16).unwrap();
    cow.data_mut()[0] = 0xAA;

    let shared = MappedRegion::new(&obj, MapMode::ReadOnly, 0, 16).unwrap();
    assert_eq!(shared.data()[0], 0);
    assert_eq!(cow.data()[0], 0xAA);
    drop((cow, shared));
    obj.destroy().unwrap();
}

#[test]
#[should_panic(expected = "read-only")]
fn read_only_region_refuses_mutation() {
    let obj = patterned_object("mm_ro", 4096);
    let mut region = MappedRegion::new(&obj, MapMode::ReadOnly, 0, 16).unwrap();
    let name = obj.name().to_string();
    MemoryObject::destroy_by_name(&name).unwrap();
    region.data_mut()[0] = 1;
}

#[test]
fn reader_and_writer_adapters() {
    let obj = patterned_object("mm_io", 4096);
    let mut region = MappedRegion::new(&obj, MapMode::ReadWrite, 10, 32).unwrap();
    {
        let mut w = region.writer().unwrap();
        w.write_all(b"hello").unwrap();
        w.seek(SeekFrom::End(-3)).unwrap();
        w.write_all(b"end").unwrap();
        // Past the end nothing more fits.
        assert_eq!(w.write(b"x").unwrap(), 0);
        w.flush().unwrap();
    }

    let mut r = region.reader();
    let mut all = Vec::new();
    r.read_to_end(&mut all).unwrap();
    assert_eq!(all.len(), 32);
    assert_eq!(&all[..5], b"hello");
    assert_eq!(&all[29..], b"end");

    r.seek(SeekFrom::Start(5)).unwrap();
    let mut one = [0u8; 1];
    r.read_exact(&mut one).unwrap();
    assert_eq!(one[0], (15 % 251) as u8);
    assert!(r.seek(SeekFrom::Current(-100)).is_err());

    drop(region);
    obj.destroy().unwrap();
}

#[test]
fn writer_needs_writable_mapping() {
    let obj = patterned_object("mm_ro_writer", 4096);
    let mut region = MappedRegion::new(&obj, MapMode::ReadPrivate, 0, 8).unwrap();
    assert!(matches!(region.writer(), Err(IpcError::InvalidFlags)));
    drop(region);
    obj.destroy().unwrap();
}

#[test]
fn maps_plain_files() {
    let path = std::env::temp_dir().join(unique_name("mm_file"));
    std::fs::write(&path, vec![7u8; 10_000]).unwrap();
    let file = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();

    let mut region = MappedRegion::new(&file, MapMode::ReadWrite, 9000, 0).unwrap();
    assert_eq!(region.size(), 1000);
    assert!(region.data().iter().all(|&b| b == 7));
    region.data_mut()[999] = 9;
    region.flush(false).unwrap();
    region.close().unwrap();

    let contents = std::fs::read(&path).unwrap();
    assert_eq!(contents[9999], 9);
    std::fs::remove_file(&path).unwrap();
}
