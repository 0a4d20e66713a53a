// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The cache server runtime: listener, acceptor thread, worker pool.
//!
//! [`CacheServer`] wires a [`Cache`] implementation to the TCP front end
//! and owns every piece of runtime state; nothing here is process-global.
//! Construct one per process (or per test), `start` it, talk to it over
//! TCP, `stop` it.
//!
//! Shutdown order: stop the acceptor (which closes the server socket and
//! the selector), drain the worker pool with a deadline, then close the
//! remembered client connections.

pub mod acceptor;
pub mod worker;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cache::{Cache, SlabRouter};
use crate::config::{ConfigError, ServerConfig};
use crate::metrics::ServerMetrics;
use acceptor::{Acceptor, ConnectionMap};
use worker::WorkerPool;

/// How long `stop` waits for busy workers before detaching them.
const WORKER_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);

/// Listen backlog.
const LISTEN_BACKLOG: i32 = 1024;

/// The service contract: a long-running component with explicit lifecycle.
pub trait Service {
    fn start(&mut self) -> Result<(), ServerError>;
    fn stop(&mut self);
}

/// Server lifecycle errors.
#[derive(Debug)]
pub enum ServerError {
    /// Invalid configuration.
    Config(ConfigError),

    /// Socket or thread setup failed.
    Io(io::Error),

    /// `start` called while already running.
    AlreadyRunning,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::AlreadyRunning => write!(f, "server already running"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Runtime state that exists only while the server runs.
struct Running {
    acceptor_thread: JoinHandle<()>,
    waker: Arc<mio::Waker>,
    running: Arc<AtomicBool>,
    pool: Arc<WorkerPool>,
    connections: ConnectionMap,
}

/// TCP cache server over any [`Cache`] implementation.
pub struct CacheServer {
    config: ServerConfig,
    cache: Arc<dyn Cache>,
    max_value_size: usize,
    metrics: Arc<ServerMetrics>,
    local_addr: Option<SocketAddr>,
    state: Option<Running>,
}

impl CacheServer {
    /// Wire an existing cache to the front end. `max_value_size` bounds
    /// the payload size worth buffering (anything larger is drained and
    /// refused).
    pub fn new(config: ServerConfig, cache: Arc<dyn Cache>, max_value_size: usize) -> Self {
        Self {
            config,
            cache,
            max_value_size,
            metrics: Arc::new(ServerMetrics::new()),
            local_addr: None,
            state: None,
        }
    }

    /// Build the standard stack: a [`SlabRouter`] sized from the config.
    pub fn with_router(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let router = SlabRouter::new(&config.cache)?;
        let max_value_size = router.max_value_size();
        Ok(Self::new(config, Arc::new(router), max_value_size))
    }

    /// Address actually bound, available once started. With port 0 this is
    /// where the ephemeral port shows up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Server metrics.
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    /// Non-blocking listener with `SO_REUSEADDR`.
    fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }
}

impl Service for CacheServer {
    fn start(&mut self) -> Result<(), ServerError> {
        if self.state.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        self.config.validate()?;

        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = Self::bind_listener(addr)?;
        self.local_addr = Some(listener.local_addr()?);

        let pool = Arc::new(WorkerPool::new(
            self.config.core_workers,
            self.config.max_workers,
            self.config.worker_queue_capacity,
        )?);
        let running = Arc::new(AtomicBool::new(true));
        let connections: ConnectionMap = Arc::new(Mutex::new(HashMap::new()));

        let (acceptor, waker) = Acceptor::new(
            listener,
            Arc::clone(&connections),
            Arc::clone(&running),
            Arc::clone(&pool),
            Arc::clone(&self.cache),
            Arc::clone(&self.metrics),
            self.max_value_size,
            self.config.max_command_buffer,
            Duration::from_millis(self.config.poll_timeout_ms),
        )?;

        let acceptor_thread = std::thread::Builder::new()
            .name("hkv-acceptor".to_string())
            .spawn(move || acceptor.run())?;

        if let Some(addr) = self.local_addr {
            tracing::info!(%addr, workers = self.config.core_workers, "cache server listening");
        }

        self.state = Some(Running {
            acceptor_thread,
            waker,
            running,
            pool,
            connections,
        });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        // Stop accepting: the acceptor exits its loop and drops the server
        // socket and the selector with it.
        state.running.store(false, Ordering::Release);
        let _ = state.waker.wake();
        if state.acceptor_thread.join().is_err() {
            tracing::error!("acceptor thread panicked");
        }

        // Drain in-flight turns.
        state.pool.shutdown(WORKER_SHUTDOWN_DEADLINE);

        // Close the remembered client connections.
        let remembered: Vec<_> = state.connections.lock().drain().collect();
        for _ in &remembered {
            self.metrics.record_connection_closed();
        }
        drop(remembered);

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            accepted = snapshot.connections_accepted,
            protocol_errors = snapshot.protocol_errors,
            bytes_read = snapshot.bytes_read,
            bytes_written = snapshot.bytes_written,
            "cache server stopped"
        );
    }
}

impl Drop for CacheServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
