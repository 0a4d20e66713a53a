// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size-based routing across slabs.
//!
//! `set` carries a size, so it routes directly: the smallest slab whose
//! slot fits the serialized value. `get` carries no size hint, so it fans
//! out to every slab through a small fixed executor and takes the first
//! non-null answer; the remaining sub-lookups are cancelled advisorily.
//!
//! ```text
//!            set(key, value)                 get(key)
//!                  |                            |
//!          size -> slab                 +-------+-------+----- ... ----+
//!                  |                    v       v       v             v
//!             SlabCache[i]          slab[0] slab[1] slab[2]  ...  slab[9]
//!                                       \       |       |            /
//!                                        +--- first non-null wins --+
//! ```
//!
//! The router never purges other slabs on `set`: a key rewritten at a size
//! that routes to a different slab leaves the old copy shadowed in the old
//! slab, and a later broadcast may return either copy. See DESIGN.md.

use crossbeam::channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::page::PagePool;
use super::slab::Slab;
use super::slab_cache::SlabCache;
use super::value::CacheValue;
use super::Cache;
use crate::config::{CacheConfig, ConfigError, SLAB_SLOT_SIZES};
use crate::metrics::CacheMetrics;

/// Queue capacity of the lookup executor; sized well past the deepest
/// plausible fan-out backlog so broadcasts rarely block on submit.
const LOOKUP_QUEUE_CAPACITY: usize = 1024;

/// Routes operations across the slab caches.
pub struct SlabRouter {
    /// Slab caches ascending by slot size.
    slabs: Vec<Arc<SlabCache>>,
    lookups: LookupExecutor,
    metrics: Arc<CacheMetrics>,
}

impl SlabRouter {
    /// Build the shipped geometry: ten slabs at `16 * 4^i` bytes over one
    /// shared page pool.
    pub fn new(config: &CacheConfig) -> Result<Self, ConfigError> {
        Self::with_geometry(
            config.memory_budget,
            &SLAB_SLOT_SIZES,
            config.lookup_threads,
        )
    }

    /// Build with explicit slot sizes (ascending). Used by tests to work
    /// with a handful of pages instead of the full budget.
    pub fn with_geometry(
        memory_budget: usize,
        slot_sizes: &[usize],
        lookup_threads: usize,
    ) -> Result<Self, ConfigError> {
        assert!(!slot_sizes.is_empty(), "at least one slab required");
        assert!(
            slot_sizes.windows(2).all(|w| w[0] < w[1]),
            "slot sizes must be strictly ascending"
        );

        let pool = Arc::new(PagePool::new(memory_budget)?);
        let metrics = Arc::new(CacheMetrics::new());

        let slabs: Vec<Arc<SlabCache>> = slot_sizes
            .iter()
            .map(|&size| {
                Arc::new(SlabCache::new(
                    Slab::new(size, Arc::clone(&pool)),
                    Arc::clone(&metrics),
                ))
            })
            .collect();

        let lookups = LookupExecutor::spawn(lookup_threads.max(1))?;

        Ok(Self {
            slabs,
            lookups,
            metrics,
        })
    }

    /// Largest serializable value size (slot size of the largest slab).
    pub fn max_value_size(&self) -> usize {
        self.slabs.last().map(|s| s.slot_size()).unwrap_or(0)
    }

    /// Shared cache metrics.
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Total live entries across all slabs (diagnostic).
    pub fn len(&self) -> usize {
        self.slabs.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slabs.iter().all(|s| s.is_empty())
    }

    fn slab_for_size(&self, serialized_size: usize) -> Option<&Arc<SlabCache>> {
        self.slabs
            .iter()
            .find(|slab| slab.slot_size() >= serialized_size)
    }
}

impl Cache for SlabRouter {
    fn get(&self, key: &[u8]) -> Option<CacheValue> {
        let hit = self.lookups.broadcast(key, &self.slabs);
        match hit {
            Some(value) => {
                self.metrics.record_hit();
                Some(value)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    fn set(&self, key: &[u8], value: &CacheValue) -> bool {
        match self.slab_for_size(value.serialized_size()) {
            Some(slab) => slab.set(key, value),
            None => {
                // Larger than the largest slot: refuse.
                self.metrics.record_store_failure();
                false
            }
        }
    }
}

// ============================================================================
// Lookup executor
// ============================================================================

struct LookupJob {
    key: Arc<[u8]>,
    slab: Arc<SlabCache>,
    cancel: Arc<AtomicBool>,
    result_tx: Sender<Option<CacheValue>>,
}

/// Fixed set of threads servicing broadcast sub-lookups.
struct LookupExecutor {
    job_tx: Option<Sender<LookupJob>>,
    handles: Vec<JoinHandle<()>>,
}

impl LookupExecutor {
    fn spawn(threads: usize) -> std::io::Result<Self> {
        let (job_tx, job_rx) = bounded::<LookupJob>(LOOKUP_QUEUE_CAPACITY);

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let job_rx = job_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("hkv-lookup-{}", i))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        // Advisory cancellation, checked at entry only; a
                        // sub-lookup past this point runs to completion.
                        let result = if job.cancel.load(Ordering::Acquire) {
                            None
                        } else {
                            job.slab.get(&job.key)
                        };
                        // The caller may have stopped listening after a hit
                        // on another slab.
                        let _ = job.result_tx.send(result);
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            job_tx: Some(job_tx),
            handles,
        })
    }

    /// Fan a lookup out across `slabs`; first non-null wins.
    fn broadcast(&self, key: &[u8], slabs: &[Arc<SlabCache>]) -> Option<CacheValue> {
        let key: Arc<[u8]> = Arc::from(key);
        let cancel = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = bounded(slabs.len());

        let job_tx = match self.job_tx.as_ref() {
            Some(tx) => tx,
            // Cleared only during teardown; nothing left to ask.
            None => return None,
        };
        for slab in slabs {
            let job = LookupJob {
                key: Arc::clone(&key),
                slab: Arc::clone(slab),
                cancel: Arc::clone(&cancel),
                result_tx: result_tx.clone(),
            };
            if let Err(undelivered) = job_tx.send(job) {
                // Executor threads are gone; answer this probe inline.
                let job = undelivered.into_inner();
                let _ = job.result_tx.send(job.slab.get(&job.key));
            }
        }
        drop(result_tx);

        for _ in 0..slabs.len() {
            match result_rx.recv() {
                Ok(Some(value)) => {
                    cancel.store(true, Ordering::Release);
                    return Some(value);
                }
                Ok(None) => {}
                Err(_) => break,
            }
        }
        None
    }
}

impl Drop for LookupExecutor {
    fn drop(&mut self) {
        // Closing the channel stops the threads.
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod router_tests;
