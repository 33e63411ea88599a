// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Binary max-heap of messages laid out in shared memory:
//
//   header   i32 max_queue_size, i32 max_msg_size, i32 size (atomic)
//   index    max_queue_size x { i32 msg_len, i32 msg_prio, i32 slot_idx }
//   slots    max_queue_size x { i32 entry_idx, u8[max_msg_size] }
//
// Index entries [0, size) form the heap; entries [size, cap) hold the slot
// numbers of free slots. Every slot points back at the index entry that
// owns it. Slots are packed, so their fields are accessed unaligned.
//
// All mutation happens under the queue mutex; only `len` is read lock-free.

use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

pub(crate) const HEADER_LEN: usize = 3 * 4;

/// Highest priority a message can carry; priorities are stored as `i32`.
pub const MAX_PRIORITY: u32 = i32::MAX as u32;
const INDEX_ENTRY_LEN: usize = 3 * 4;

/// Queue geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapShape {
    pub max_queue_size: usize,
    pub max_msg_size: usize,
}

impl HeapShape {
    /// Bytes needed for header, index and slots.
    pub fn total_size(&self) -> usize {
        HEADER_LEN + self.max_queue_size * INDEX_ENTRY_LEN + self.max_queue_size * self.slot_len()
    }

    fn slot_len(&self) -> usize {
        4 + self.max_msg_size
    }

    /// Read the geometry published in a header. `None` until a creator has
    /// finished initialising it.
    ///
    /// # Safety
    /// `base` must point to at least [`HEADER_LEN`] mapped, 4-aligned bytes.
    pub unsafe fn read(base: *const u8) -> Option<HeapShape> {
        let cap = (*(base as *const AtomicI32)).load(Ordering::Acquire);
        let msg = ptr::read(base.add(4) as *const i32);
        if cap <= 0 || msg <= 0 {
            return None;
        }
        Some(HeapShape {
            max_queue_size: cap as usize,
            max_msg_size: msg as usize,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    len: i32,
    prio: i32,
    slot: i32,
}

/// View of a heap living at `base`. Does not own the memory.
pub struct SharedHeap {
    base: *mut u8,
    shape: HeapShape,
}

unsafe impl Send for SharedHeap {}
unsafe impl Sync for SharedHeap {}

impl SharedHeap {
    /// # Safety
    /// `base` must be 4-aligned and point to `shape.total_size()` mapped
    /// bytes that outlive the view.
    pub unsafe fn new(base: *mut u8, shape: HeapShape) -> Self {
        Self { base, shape }
    }

    pub fn shape(&self) -> HeapShape {
        self.shape
    }

    /// Lay out an empty heap. The queue size is published last, so openers
    /// polling [`HeapShape::read`] see a complete header.
    pub fn init(&self) {
        unsafe {
            ptr::write(self.base.add(4) as *mut i32, self.shape.max_msg_size as i32);
        }
        self.size_cell().store(0, Ordering::Relaxed);
        for i in 0..self.shape.max_queue_size {
            self.set_entry(
                i,
                IndexEntry {
                    len: 0,
                    prio: 0,
                    slot: i as i32,
                },
            );
            self.set_back_ptr(i, i);
        }
        self.cap_cell()
            .store(self.shape.max_queue_size as i32, Ordering::Release);
    }

    fn cap_cell(&self) -> &AtomicI32 {
        unsafe { &*(self.base as *const AtomicI32) }
    }

    fn size_cell(&self) -> &AtomicI32 {
        unsafe { &*(self.base.add(8) as *const AtomicI32) }
    }

    /// Number of queued messages. Safe to call without the lock.
    pub fn len(&self) -> usize {
        self.size_cell().load(Ordering::Acquire).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.shape.max_queue_size
    }

    fn entry_ptr(&self, i: usize) -> *mut u8 {
        debug_assert!(i < self.shape.max_queue_size);
        unsafe { self.base.add(HEADER_LEN + i * INDEX_ENTRY_LEN) }
    }

    fn entry(&self, i: usize) -> IndexEntry {
        let p = self.entry_ptr(i) as *const i32;
        unsafe {
            IndexEntry {
                len: ptr::read(p),
                prio: ptr::read(p.add(1)),
                slot: ptr::read(p.add(2)),
            }
        }
    }

    fn set_entry(&self, i: usize, e: IndexEntry) {
        let p = self.entry_ptr(i) as *mut i32;
        unsafe {
            ptr::write(p, e.len);
            ptr::write(p.add(1), e.prio);
            ptr::write(p.add(2), e.slot);
        }
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        debug_assert!(slot < self.shape.max_queue_size);
        let off = HEADER_LEN
            + self.shape.max_queue_size * INDEX_ENTRY_LEN
            + slot * self.shape.slot_len();
        unsafe { self.base.add(off) }
    }

    fn back_ptr(&self, slot: usize) -> usize {
        unsafe { ptr::read_unaligned(self.slot_ptr(slot) as *const i32) as usize }
    }

    fn set_back_ptr(&self, slot: usize, entry: usize) {
        unsafe { ptr::write_unaligned(self.slot_ptr(slot) as *mut i32, entry as i32) }
    }

    fn slot_data(&self, slot: usize) -> *mut u8 {
        unsafe { self.slot_ptr(slot).add(4) }
    }

    fn prio(&self, i: usize) -> u32 {
        self.entry(i).prio as u32
    }

    fn swap(&self, i: usize, j: usize) {
        let (a, b) = (self.entry(i), self.entry(j));
        self.set_entry(i, b);
        self.set_entry(j, a);
        self.set_back_ptr(b.slot as usize, i);
        self.set_back_ptr(a.slot as usize, j);
    }

    fn sift_up(&self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.prio(i) <= self.prio(parent) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&self, mut i: usize, n: usize) {
        loop {
            let (l, r) = (2 * i + 1, 2 * i + 2);
            let mut top = i;
            if l < n && self.prio(l) > self.prio(top) {
                top = l;
            }
            if r < n && self.prio(r) > self.prio(top) {
                top = r;
            }
            if top == i {
                return;
            }
            self.swap(i, top);
            i = top;
        }
    }

    /// Length of the highest-priority message, if any.
    pub fn peek_len(&self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        Some(self.entry(0).len as usize)
    }

    /// Insert a message. The caller holds the queue lock and has checked
    /// `data.len() <= max_msg_size`.
    ///
    /// # Panics
    /// If the heap is full or `prio` exceeds [`MAX_PRIORITY`].
    pub fn push(&self, data: &[u8], prio: u32) {
        let size = self.len();
        assert!(size < self.shape.max_queue_size, "push to full heap");
        assert!(prio <= MAX_PRIORITY, "priority out of range");
        assert!(data.len() <= self.shape.max_msg_size);
        let slot = self.entry(size).slot as usize;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.slot_data(slot), data.len());
        }
        self.set_entry(
            size,
            IndexEntry {
                len: data.len() as i32,
                prio: prio as i32,
                slot: slot as i32,
            },
        );
        self.set_back_ptr(slot, size);
        self.sift_up(size);
        self.size_cell().store(size as i32 + 1, Ordering::Release);
    }

    /// Remove the highest-priority message into `buf`, returning its length
    /// and priority. The caller holds the queue lock and has checked that
    /// `buf` is large enough.
    ///
    /// # Panics
    /// If the heap is empty or `buf` is too short.
    pub fn pop(&self, buf: &mut [u8]) -> (usize, u32) {
        let size = self.len();
        assert!(size > 0, "pop from empty heap");
        let root = self.entry(0);
        let len = root.len as usize;
        assert!(buf.len() >= len);
        unsafe {
            ptr::copy_nonoverlapping(self.slot_data(root.slot as usize), buf.as_mut_ptr(), len);
        }
        let last = size - 1;
        // The popped slot ends up at `last`, i.e. on the free list.
        self.swap(0, last);
        self.size_cell().store(last as i32, Ordering::Release);
        self.sift_down(0, last);
        (len, root.prio as u32)
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let cap = self.shape.max_queue_size;
        let size = self.len();
        let mut seen = vec![false; cap];
        for i in 0..cap {
            let slot = self.entry(i).slot as usize;
            assert!(slot < cap);
            assert!(!seen[slot], "slot {slot} owned twice");
            seen[slot] = true;
            assert_eq!(self.back_ptr(slot), i);
        }
        for i in 1..size {
            assert!(self.prio(i) <= self.prio((i - 1) / 2));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // u32 backing keeps the header cells aligned.
    fn heap(cap: usize, msg: usize) -> (Vec<u32>, SharedHeap) {
        let shape = HeapShape {
            max_queue_size: cap,
            max_msg_size: msg,
        };
        let mut mem = vec![0u32; shape.total_size().div_ceil(4)];
        let h = unsafe { SharedHeap::new(mem.as_mut_ptr() as *mut u8, shape) };
        h.init();
        (mem, h)
    }

    #[test]
    fn header_publishes_shape() {
        let (mem, h) = heap(8, 13);
        let read = unsafe { HeapShape::read(mem.as_ptr() as *const u8) };
        assert_eq!(read, Some(h.shape()));
        assert_eq!(h.shape().total_size(), 12 + 8 * 12 + 8 * 17);
    }

    #[test]
    fn pops_in_priority_order() {
        let (_mem, h) = heap(8, 8);
        for p in [8u32, 4, 7, 1, 0, 15, 2, 4] {
            h.push(&p.to_le_bytes(), p);
        }
        assert!(h.is_full());
        let mut out = Vec::new();
        let mut buf = [0u8; 8];
        while !h.is_empty() {
            let (len, prio) = h.pop(&mut buf);
            assert_eq!(len, 4);
            assert_eq!(u32::from_le_bytes(buf[..4].try_into().unwrap()), prio);
            out.push(prio);
            h.check_invariants();
        }
        assert_eq!(out, vec![15, 8, 7, 4, 4, 2, 1, 0]);
    }

    #[test]
    fn max_priority_stays_positive_on_disk() {
        let (mem, h) = heap(2, 1);
        h.push(b"a", 1);
        h.push(b"b", MAX_PRIORITY);
        // Index entry 0, field `msg_prio`, as a C reader sees it.
        let raw = mem[HEADER_LEN / 4 + 1] as i32;
        assert_eq!(raw, i32::MAX);
        let mut buf = [0u8; 1];
        assert_eq!(h.pop(&mut buf), (1, MAX_PRIORITY));
        assert_eq!(&buf, b"b");
    }

    #[test]
    #[should_panic(expected = "priority out of range")]
    fn push_rejects_out_of_range_priority() {
        let (_mem, h) = heap(1, 1);
        h.push(b"a", MAX_PRIORITY + 1);
    }

    #[test]
    #[should_panic(expected = "push to full heap")]
    fn push_full_panics() {
        let (_mem, h) = heap(1, 1);
        h.push(b"a", 0);
        h.push(b"b", 0);
    }

    #[test]
    #[should_panic(expected = "pop from empty heap")]
    fn pop_empty_panics() {
        let (_mem, h) = heap(1, 1);
        h.pop(&mut [0u8; 1]);
    }

    proptest! {
        #[test]
        fn behaves_like_a_max_heap(
            ops in proptest::collection::vec(prop::option::of((0..=MAX_PRIORITY, 0usize..6)), 1..300)
        ) {
            let (_mem, h) = heap(6, 5);
            let mut model: Vec<(u32, Vec<u8>)> = Vec::new();
            let mut buf = [0u8; 5];
            for op in ops {
                match op {
                    Some((prio, len)) if !h.is_full() => {
                        let data: Vec<u8> = (0..len).map(|i| (prio as usize + i) as u8).collect();
                        h.push(&data, prio);
                        model.push((prio, data));
                    }
                    None if !h.is_empty() => {
                        let (len, prio) = h.pop(&mut buf);
                        let best = model.iter().map(|(p, _)| *p).max().unwrap();
                        prop_assert_eq!(prio, best);
                        let pos = model
                            .iter()
                            .position(|(p, d)| *p == prio && d.as_slice() == &buf[..len])
                            .expect("popped message was queued");
                        model.remove(pos);
                    }
                    _ => {}
                }
                prop_assert_eq!(h.len(), model.len());
                h.check_invariants();
            }
        }
    }
}
