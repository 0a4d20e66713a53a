// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HKV Cache Server
//!
//! Standalone in-memory cache speaking the memcached text protocol
//! (`get` / `set`) over TCP.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port (11211) with the default 160 MiB budget
//! hkv-server
//!
//! # Custom port and budget
//! hkv-server --port 11311 --budget-mb 512
//!
//! # From a config file
//! hkv-server --config server.json
//! ```

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hkv::{CacheServer, ServerConfig, Service};

/// HKV Cache Server - slab-paged LRU cache over the memcached text protocol
#[derive(Parser, Debug)]
#[command(name = "hkv-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "11211")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Global memory budget in MiB (carved into 16 MiB pages)
    #[arg(long, default_value = "160")]
    budget_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or assemble config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        let mut config = ServerConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            ..Default::default()
        };
        config.cache.memory_budget = args.budget_mb * 1024 * 1024;
        config
    };

    info!("+----------------------------------------------------+");
    info!(
        "|        HKV Cache Server v{}                     |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!(
        "|  Bind:    {:40} |",
        format!("{}:{}", config.bind_address, config.port)
    );
    info!(
        "|  Budget:  {:40} |",
        format!("{} MiB", config.cache.memory_budget / (1024 * 1024))
    );
    info!(
        "|  Workers: {:40} |",
        format!("{}..{}", config.core_workers, config.max_workers)
    );
    info!("+----------------------------------------------------+");

    // Create and start the server
    let mut server = CacheServer::with_router(config)?;
    server.start()?;

    // Block until a shutdown signal arrives
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received, stopping server...");
    }

    server.stop();
    info!("Cache server stopped");
    Ok(())
}
