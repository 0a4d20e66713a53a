// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concurrent key/value cache for one slot size.
//!
//! A `SlabCache` couples a [`Slab`] with a recency-ordered key map. The map
//! and the LRU order are one `lru::LruCache` (unbounded capacity; eviction
//! is driven by slot availability, not entry count), so the two can never
//! disagree about membership.
//!
//! # Locking discipline
//!
//! One mutex (the map lock) guards the key map and LRU order together.
//! Each slot has its own mutex guarding its bytes. Ordering is strict:
//!
//! 1. acquire map lock
//! 2. acquire the slot mutex
//! 3. release the map lock
//! 4. perform slot I/O under the slot mutex only
//! 5. reacquire the map lock to install, then release both
//!
//! The map lock is never held across slot I/O. Step 5 takes the map lock
//! while still holding the slot mutex; that cannot deadlock because a slot
//! held for writing is reachable from neither the map nor the freelist, so
//! no map-lock holder can be waiting on it.

use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;

use super::slab::{Slab, Slot};
use super::value::CacheValue;
use super::Cache;
use crate::metrics::CacheMetrics;

/// A slab plus its key map and LRU order.
pub struct SlabCache {
    slab: Slab,
    /// The map lock: key map and recency order as one structure.
    map: Mutex<LruCache<Box<[u8]>, Arc<Slot>>>,
    metrics: Arc<CacheMetrics>,
}

impl SlabCache {
    pub fn new(slab: Slab, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            slab,
            map: Mutex::new(LruCache::unbounded()),
            metrics,
        }
    }

    /// Slot size of the underlying slab.
    pub fn slot_size(&self) -> usize {
        self.slab.slot_size()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Look up without promoting (test and diagnostic use).
    pub fn peek(&self, key: &[u8]) -> bool {
        self.map.lock().peek(key).is_some()
    }
}

impl Cache for SlabCache {
    fn get(&self, key: &[u8]) -> Option<CacheValue> {
        // Map lock: find the slot and promote the key to most-recent.
        let mut map = self.map.lock();
        let slot = match map.get(key) {
            Some(slot) => Arc::clone(slot),
            None => return None,
        };
        let guard = slot.lock();
        drop(map);

        // Slot I/O under the slot mutex only.
        let decoded = CacheValue::decode(slot.bytes(&guard));
        drop(guard);

        match decoded {
            Ok(value) => Some(value),
            Err(e) => {
                // Cannot happen while slot bookkeeping is correct: every
                // mapped slot holds the output of a completed encode.
                tracing::error!(slot_size = self.slab.slot_size(), error = %e,
                    "malformed slot contents; treating as miss");
                None
            }
        }
    }

    fn set(&self, key: &[u8], value: &CacheValue) -> bool {
        let size = value.serialized_size();
        if size > self.slab.slot_size() {
            self.metrics.record_store_failure();
            return false;
        }

        // Map lock: take the slot to write into. An existing entry is
        // removed (and with it its LRU position) and its slot reused in
        // place; otherwise a free slot is pulled from the slab; otherwise
        // the least-recently-used entry is evicted for its slot.
        let mut map = self.map.lock();
        let slot = if let Some(slot) = map.pop(key) {
            slot
        } else if let Some(slot) = self.slab.get_slot() {
            slot
        } else if let Some((_victim, slot)) = map.pop_lru() {
            self.metrics.record_eviction();
            slot
        } else {
            // Another slab took all memory before this one ever got a page.
            drop(map);
            self.metrics.record_store_failure();
            return false;
        };
        let mut guard = slot.lock();
        drop(map);

        // Slot I/O under the slot mutex only.
        value.encode_into(slot.bytes_mut(&mut guard));

        // Reinstall at the most-recent end, then release the slot mutex.
        let mut map = self.map.lock();
        if let Some((_, displaced)) = map.push(key.into(), Arc::clone(&slot)) {
            // A concurrent set of the same key installed its own slot while
            // we were writing ours; push() replaced it. Both writes were
            // complete values, so either outcome satisfies last-write-wins;
            // the displaced slot must go back on the freelist or it would
            // be neither mapped nor free.
            if !Arc::ptr_eq(&displaced, &slot) {
                self.slab.put_slot(displaced);
            }
        }
        drop(map);
        drop(guard);

        self.metrics.record_store();
        true
    }
}

#[cfg(test)]
#[path = "slab_cache_tests.rs"]
mod slab_cache_tests;
