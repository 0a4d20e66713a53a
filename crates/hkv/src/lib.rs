// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HKV - Slab-Paged In-Memory Cache Server
//!
//! An in-memory key/value cache speaking a subset of the memcached text
//! protocol (`get` / `set`) over TCP, with slab-class memory management
//! and per-slab LRU eviction inside a fixed global budget.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hkv::{CacheServer, ServerConfig, Service};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = CacheServer::with_router(ServerConfig::default())?;
//!     server.start()?;
//!     // ... serve until told otherwise ...
//!     server.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          Network Layer                             |
//! |   Acceptor (mio selector) -> bounded WorkerPool -> Dispatcher      |
//! +--------------------------------------------------------------------+
//! |                          Protocol Layer                            |
//! |   LineFramer (buffered fields/payloads) | command parse + render   |
//! +--------------------------------------------------------------------+
//! |                            Cache Layer                             |
//! |   SlabRouter -> SlabCache (key map + LRU) -> Slab -> PagePool      |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Memory is carved once: the [`cache::page::PagePool`] splits the budget
//! into 16 MiB pages; a page handed to a slab stays with that slab for the
//! life of the process. Each slab serves one slot size (`16 * 4^i` bytes,
//! ten classes); a `set` routes to the smallest fitting slab, a `get`
//! broadcasts across all of them.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CacheServer`] | Owns the listener, selector thread, and worker pool |
//! | [`SlabRouter`] | Routes `set` by size, fans `get` out across slabs |
//! | [`Cache`] | The get/set contract between protocol and storage |
//! | [`Service`] | Start/stop lifecycle contract |
//! | [`ServerConfig`] | All runtime knobs, shipped defaults included |

/// Slab-paged cache: pages, slabs, per-slab caches, and the router.
pub mod cache;
/// Server and cache configuration.
pub mod config;
/// Atomic counters for cache and connection activity.
pub mod metrics;
/// Text protocol framing, parsing, and dispatch.
pub mod protocol;
/// TCP runtime: acceptor thread, worker pool, lifecycle.
pub mod server;

pub use cache::{Cache, CacheValue, SlabRouter};
pub use config::{CacheConfig, ConfigError, ServerConfig};
pub use metrics::{CacheMetricsSnapshot, ServerMetricsSnapshot};
pub use server::{CacheServer, ServerError, Service};

/// HKV version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
