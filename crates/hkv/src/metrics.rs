// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache and server metrics.
//!
//! Plain atomic counters with `record_*` methods and snapshot structs for
//! logging. Internal only: no wire command exposes these.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// ============================================================================
// Cache metrics
// ============================================================================

/// Counters for cache operations, shared across all slabs.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// `get` calls that returned a value.
    hits: AtomicU64,

    /// `get` calls that returned nothing.
    misses: AtomicU64,

    /// Successful `set` calls.
    stores: AtomicU64,

    /// `set` calls refused (oversize value or memory exhausted).
    store_failures: AtomicU64,

    /// Entries evicted to make room.
    evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub store_failures: u64,
    pub evictions: u64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Server metrics
// ============================================================================

/// Counters for the connection and dispatch path.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Connections currently registered with the selector.
    active_connections: AtomicUsize,

    /// Total connections accepted.
    connections_accepted: AtomicU64,

    /// Total connections closed (any reason).
    connections_closed: AtomicU64,

    /// Requests answered with ERROR or CLIENT_ERROR.
    protocol_errors: AtomicU64,

    /// Requests answered with SERVER_ERROR.
    internal_errors: AtomicU64,

    /// Dispatches deferred because the worker queue was full.
    dispatch_deferrals: AtomicU64,

    /// Payload and command bytes read from clients.
    bytes_read: AtomicU64,

    /// Response bytes written to clients.
    bytes_written: AtomicU64,
}

/// Point-in-time copy of [`ServerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerMetricsSnapshot {
    pub active_connections: usize,
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub protocol_errors: u64,
    pub internal_errors: u64,
    pub dispatch_deferrals: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_deferral(&self) {
        self.dispatch_deferrals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerMetricsSnapshot {
        ServerMetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            dispatch_deferrals: self.dispatch_deferrals.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
