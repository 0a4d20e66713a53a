// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-slot-size allocator.
//!
//! A slab serves exactly one slot size. It starts with no memory; the first
//! `get_slot` on an empty freelist pulls a page from the [`PagePool`] and
//! splits it into `PAGE_SIZE / slot_size` slots. When the pool runs dry the
//! slab remembers that (sticky `pool_exhausted`) and never asks again --
//! from then on its memory footprint is fixed and reuse happens through
//! `put_slot` and the caller's eviction policy.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

use super::page::{Page, PagePool, PAGE_SIZE};

/// A fixed-length byte region inside a page.
///
/// The slot's mutex guards its bytes during encode/decode. A slot carries
/// no key; the key-to-slot association lives in the owning cache's map.
pub struct Slot {
    page: Arc<Page>,
    offset: usize,
    len: usize,
    lock: Mutex<()>,
}

impl Slot {
    /// Acquire this slot's mutex.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Slot capacity in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// View of the slot's bytes. The guard parameter is the witness that
    /// the slot mutex is held.
    pub fn bytes<'s>(&'s self, _guard: &MutexGuard<'_, ()>) -> &'s [u8] {
        // SAFETY: the caller holds this slot's mutex (witnessed by the
        // guard), and the range was validated against the page at carve
        // time.
        unsafe { self.page.slice(self.offset, self.len) }
    }

    /// Mutable view of the slot's bytes; guard witness as in [`Slot::bytes`].
    #[allow(clippy::mut_from_ref)]
    pub fn bytes_mut<'s>(&'s self, _guard: &mut MutexGuard<'_, ()>) -> &'s mut [u8] {
        // SAFETY: as bytes(), with exclusivity from the mutably borrowed
        // guard.
        unsafe { self.page.slice_mut(self.offset, self.len) }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

struct SlabState {
    freelist: Vec<Arc<Slot>>,
    /// Set once the pool refused a page; never cleared.
    pool_exhausted: bool,
}

/// Allocator for one slot size.
pub struct Slab {
    slot_size: usize,
    pool: Arc<PagePool>,
    state: Mutex<SlabState>,
}

impl Slab {
    /// Create a slab for `slot_size`-byte slots.
    ///
    /// # Panics
    /// Panics if `slot_size` is zero or does not divide [`PAGE_SIZE`]
    /// evenly; slab geometry is fixed at startup, so this is a
    /// configuration bug.
    pub fn new(slot_size: usize, pool: Arc<PagePool>) -> Self {
        assert!(slot_size > 0, "slot size must be non-zero");
        assert_eq!(
            PAGE_SIZE % slot_size,
            0,
            "slot size {} must divide the page size {}",
            slot_size,
            PAGE_SIZE
        );

        Self {
            slot_size,
            pool,
            state: Mutex::new(SlabState {
                freelist: Vec::new(),
                pool_exhausted: false,
            }),
        }
    }

    /// Slot size served by this slab.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Take a free slot, growing by one page from the pool if needed.
    ///
    /// Returns `None` once the freelist is empty and the pool is exhausted.
    /// The returned slot is owned by the caller until `put_slot` or until
    /// it is installed in a key map.
    pub fn get_slot(&self) -> Option<Arc<Slot>> {
        let mut state = self.state.lock();

        if let Some(slot) = state.freelist.pop() {
            return Some(slot);
        }

        if state.pool_exhausted {
            return None;
        }

        match self.pool.acquire() {
            Some(page) => {
                let count = PAGE_SIZE / self.slot_size;
                state.freelist.reserve(count);
                for i in 0..count {
                    state.freelist.push(Arc::new(Slot {
                        page: Arc::clone(&page),
                        offset: i * self.slot_size,
                        len: self.slot_size,
                        lock: Mutex::new(()),
                    }));
                }
                state.freelist.pop()
            }
            None => {
                state.pool_exhausted = true;
                None
            }
        }
    }

    /// Return a slot to the freelist.
    pub fn put_slot(&self, slot: Arc<Slot>) {
        self.state.lock().freelist.push(slot);
    }

    /// Free slots currently available without growing.
    pub fn free_slots(&self) -> usize {
        self.state.lock().freelist.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn test_first_get_slot_carves_a_page() {
        let pool = Arc::new(PagePool::new(PAGE_SIZE).expect("pool should build"));
        let slab = Slab::new(MB, pool);

        let slot = slab.get_slot().expect("slot from fresh page");
        assert_eq!(slot.len(), MB);
        // 16 slots per page, one handed out.
        assert_eq!(slab.free_slots(), PAGE_SIZE / MB - 1);
    }

    #[test]
    fn test_exhaustion_is_sticky() {
        let pool = Arc::new(PagePool::new(PAGE_SIZE).expect("pool should build"));
        let greedy = Slab::new(4 * MB, Arc::clone(&pool));
        let starved = Slab::new(MB, pool);

        // Greedy slab takes the only page.
        let _held = greedy.get_slot().expect("slot from the only page");

        // Starved slab finds the pool empty and latches pool_exhausted.
        assert!(starved.get_slot().is_none());
        assert!(starved.get_slot().is_none());
        assert_eq!(starved.free_slots(), 0);
    }

    #[test]
    fn test_put_slot_recycles() {
        let pool = Arc::new(PagePool::new(PAGE_SIZE).expect("pool should build"));
        let slab = Slab::new(4 * MB, pool);

        let before = {
            let slot = slab.get_slot().expect("slot");
            let free = slab.free_slots();
            slab.put_slot(slot);
            free
        };
        assert_eq!(slab.free_slots(), before + 1);
    }

    #[test]
    fn test_slot_io_under_lock() {
        let pool = Arc::new(PagePool::new(PAGE_SIZE).expect("pool should build"));
        let slab = Slab::new(MB, pool);
        let slot = slab.get_slot().expect("slot");

        {
            let mut guard = slot.lock();
            slot.bytes_mut(&mut guard)[..4].copy_from_slice(b"abcd");
        }
        {
            let guard = slot.lock();
            assert_eq!(&slot.bytes(&guard)[..4], b"abcd");
        }
    }

    #[test]
    fn test_slots_cover_whole_page_disjointly() {
        let pool = Arc::new(PagePool::new(PAGE_SIZE).expect("pool should build"));
        let slab = Slab::new(4 * MB, pool);

        let mut held = Vec::new();
        while let Some(slot) = slab.get_slot() {
            held.push(slot);
        }

        let mut offsets: Vec<usize> = held.iter().map(|s| s.offset).collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![0, 4 * MB, 8 * MB, 12 * MB]);
    }
}
