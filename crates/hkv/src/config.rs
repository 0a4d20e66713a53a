// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server and cache configuration.
//!
//! All knobs default to the shipped sizing: 16 MiB pages, a 160 MiB global
//! budget, ten slabs at slot sizes `16 * 4^i` (16 B through 4 MiB), port
//! 11211. A zero-configuration start therefore behaves like the classic
//! deployment; the config file and CLI flags only override the ambient
//! knobs (bind address, budget, worker counts, log level).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use crate::cache::page::PAGE_SIZE;

/// Default global memory budget (160 MiB = 10 pages).
pub const DEFAULT_MEMORY_BUDGET: usize = 160 * 1024 * 1024;

/// Default TCP port (memcached's well-known port).
pub const DEFAULT_PORT: u16 = 11211;

/// Slot sizes of the ten slabs, ascending: `16 * 4^i` for i = 0..9.
///
/// Each divides [`PAGE_SIZE`] evenly; the largest (4 MiB) bounds the
/// largest storable value at `4 MiB - 6` payload bytes.
pub const SLAB_SLOT_SIZES: [usize; 10] = [
    16,
    64,
    256,
    1024,
    4096,
    16384,
    65536,
    262144,
    1048576,
    4194304,
];

/// Cache sizing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Global memory budget in bytes; carved into 16 MiB pages.
    #[serde(default = "default_memory_budget")]
    pub memory_budget: usize,

    /// Threads in the router's broadcast-lookup executor.
    #[serde(default = "default_lookup_threads")]
    pub lookup_threads: usize,
}

/// Server runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 11211; 0 picks an ephemeral port).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of the worker pool's job queue.
    #[serde(default = "default_worker_queue_capacity")]
    pub worker_queue_capacity: usize,

    /// Workers spawned eagerly at startup.
    #[serde(default = "default_core_workers")]
    pub core_workers: usize,

    /// Upper bound on workers spawned under load.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Selector poll timeout in milliseconds (kept short so shutdown is
    /// noticed promptly).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Upper bound on bytes buffered for a single in-flight command
    /// (anti-OOM; oversized payloads are drained incrementally instead).
    #[serde(default = "default_max_command_buffer")]
    pub max_command_buffer: usize,

    /// Cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_memory_budget() -> usize {
    DEFAULT_MEMORY_BUDGET
}

fn default_lookup_threads() -> usize {
    4
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_worker_queue_capacity() -> usize {
    1024
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_core_workers() -> usize {
    (available_cores() / 2).max(1)
}

fn default_max_workers() -> usize {
    available_cores().max(1)
}

fn default_poll_timeout_ms() -> u64 {
    2
}

fn default_max_command_buffer() -> usize {
    // Largest storable value (4 MiB slot) plus command-line slack.
    4 * 1024 * 1024 + 4096
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget: default_memory_budget(),
            lookup_threads: default_lookup_threads(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            worker_queue_capacity: default_worker_queue_capacity(),
            core_workers: default_core_workers(),
            max_workers: default_max_workers(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_command_buffer: default_max_command_buffer(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file. Missing fields take their
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.memory_budget < PAGE_SIZE {
            return Err(ConfigError::BudgetTooSmall {
                budget: self.cache.memory_budget,
                page_size: PAGE_SIZE,
            });
        }
        if self.cache.lookup_threads == 0 {
            return Err(ConfigError::ZeroThreads("lookup_threads"));
        }
        if self.core_workers == 0 {
            return Err(ConfigError::ZeroThreads("core_workers"));
        }
        if self.max_workers < self.core_workers {
            return Err(ConfigError::WorkerBounds {
                core: self.core_workers,
                max: self.max_workers,
            });
        }
        if self.worker_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueue);
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug)]
pub enum ConfigError {
    /// Memory budget cannot hold a single page.
    BudgetTooSmall { budget: usize, page_size: usize },

    /// A thread count was configured as zero.
    ZeroThreads(&'static str),

    /// max_workers below core_workers.
    WorkerBounds { core: usize, max: usize },

    /// Worker queue capacity of zero.
    ZeroQueue,

    /// Config file could not be read.
    Io(std::io::Error),

    /// Config file could not be parsed.
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetTooSmall { budget, page_size } => write!(
                f,
                "memory budget {} is smaller than one page ({})",
                budget, page_size
            ),
            Self::ZeroThreads(which) => write!(f, "{} must be at least 1", which),
            Self::WorkerBounds { core, max } => {
                write!(f, "max_workers {} below core_workers {}", max, core)
            }
            Self::ZeroQueue => write!(f, "worker queue capacity must be at least 1"),
            Self::Io(e) => write!(f, "config file read failed: {}", e),
            Self::Parse(e) => write!(f, "config file parse failed: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_shipped_sizing() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 11211);
        assert_eq!(config.cache.memory_budget, 160 * 1024 * 1024);
        assert_eq!(config.worker_queue_capacity, 1024);
        assert!(config.core_workers >= 1);
        assert!(config.max_workers >= config.core_workers);
        config.validate().expect("defaults should validate");
    }

    #[test]
    fn test_slab_geometry() {
        assert_eq!(SLAB_SLOT_SIZES.len(), 10);
        for (i, &size) in SLAB_SLOT_SIZES.iter().enumerate() {
            assert_eq!(size, 16 << (2 * i));
            assert_eq!(PAGE_SIZE % size, 0, "slot size {} must divide page", size);
        }
        // Ascending.
        assert!(SLAB_SLOT_SIZES.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_validate_rejects_small_budget() {
        let mut config = ServerConfig::default();
        config.cache.memory_budget = PAGE_SIZE - 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BudgetTooSmall { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_worker_bounds() {
        let config = ServerConfig {
            core_workers: 8,
            max_workers: 4,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WorkerBounds { core: 8, max: 4 })
        ));
    }

    #[test]
    fn test_from_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "port": 11311, "cache": {{ "memory_budget": {} }} }}"#, PAGE_SIZE)
            .expect("write config");

        let config = ServerConfig::from_file(file.path()).expect("config should load");
        assert_eq!(config.port, 11311);
        assert_eq!(config.cache.memory_budget, PAGE_SIZE);
        // Untouched fields keep defaults.
        assert_eq!(config.worker_queue_capacity, 1024);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write config");
        assert!(matches!(
            ServerConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
