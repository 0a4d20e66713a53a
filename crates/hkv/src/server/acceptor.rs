// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acceptor: the selector loop feeding the worker pool.
//!
//! One dedicated thread owns a `mio::Poll` with three kinds of
//! registrations:
//!
//! ```text
//! +------------------------------------------------------------+
//! |                      acceptor thread                        |
//! |  +------------------------------------------------------+  |
//! |  |                      mio::Poll                        |  |
//! |  |  - listener (accept readiness)                        |  |
//! |  |  - waker (shutdown nudge)                             |  |
//! |  |  - client connections (read readiness)                |  |
//! |  +------------------------------------------------------+  |
//! |          |                                   |              |
//! |       accept                             readable           |
//! |          |                                   |              |
//! |   register + map               deregister + enqueue turn    |
//! |                                              |              |
//! |                                     +----------------+      |
//! |                                     |  worker pool   |      |
//! |                                     +----------------+      |
//! +------------------------------------------------------------+
//! ```
//!
//! A readable connection is deregistered before its turn is enqueued, so no
//! second worker can ever be dispatched for the same connection. The worker
//! re-registers it when the turn ends, or removes it from the shared map on
//! close. The acceptor itself never reads a byte.

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::worker::WorkerPool;
use crate::cache::Cache;
use crate::metrics::ServerMetrics;
use crate::protocol::{CommandDispatcher, LineFramer, TurnOutcome};

/// Token for the TCP listener.
const LISTENER_TOKEN: Token = Token(0);

/// Token for the shutdown waker.
const WAKER_TOKEN: Token = Token(1);

/// First token handed to client connections.
const CONNECTION_TOKEN_START: usize = 2;

/// Maximum events per poll.
const MAX_EVENTS: usize = 256;

/// One client connection: its stream plus the bytes buffered for it.
pub(crate) struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub framer: LineFramer,
}

/// Connections shared between the acceptor and the workers.
pub(crate) type ConnectionMap = Arc<Mutex<HashMap<Token, Arc<Mutex<Connection>>>>>;

/// Everything a worker needs to run and finish a turn.
struct DispatchContext {
    connections: ConnectionMap,
    registry: Arc<Registry>,
    cache: Arc<dyn Cache>,
    metrics: Arc<ServerMetrics>,
    max_value_size: usize,
}

/// The selector loop.
pub(crate) struct Acceptor {
    poll: Poll,
    listener: TcpListener,
    connections: ConnectionMap,
    registry: Arc<Registry>,
    next_token: usize,
    running: Arc<AtomicBool>,
    pool: Arc<WorkerPool>,
    cache: Arc<dyn Cache>,
    metrics: Arc<ServerMetrics>,
    max_value_size: usize,
    max_command_buffer: usize,
    poll_timeout: Duration,
}

impl Acceptor {
    /// Register the listener and build the shared waker.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: std::net::TcpListener,
        connections: ConnectionMap,
        running: Arc<AtomicBool>,
        pool: Arc<WorkerPool>,
        cache: Arc<dyn Cache>,
        metrics: Arc<ServerMetrics>,
        max_value_size: usize,
        max_command_buffer: usize,
        poll_timeout: Duration,
    ) -> io::Result<(Self, Arc<Waker>)> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let registry = Arc::new(poll.registry().try_clone()?);

        Ok((
            Self {
                poll,
                listener,
                connections,
                registry,
                next_token: CONNECTION_TOKEN_START,
                running,
                pool,
                cache,
                metrics,
                max_value_size,
                max_command_buffer,
                poll_timeout,
            },
            waker,
        ))
    }

    /// Run until the running flag drops. Dropping `self` afterwards closes
    /// the server socket and the selector.
    pub fn run(mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);

        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(error = %e, "selector poll failed; stopping acceptor");
                break;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_ready(),
                    WAKER_TOKEN => {
                        // Shutdown nudge; the loop condition does the rest.
                    }
                    token => {
                        if event.is_readable() {
                            self.dispatch(token);
                        }
                    }
                }
            }
        }

        tracing::debug!("acceptor loop exited");
    }

    /// Accept every pending connection.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) =
                        self.registry
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        tracing::warn!(%peer, error = %e, "failed to register connection");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);

                    self.connections.lock().insert(
                        token,
                        Arc::new(Mutex::new(Connection {
                            stream,
                            peer,
                            framer: LineFramer::new(self.max_command_buffer),
                        })),
                    );
                    self.metrics.record_connection_accepted();
                    tracing::debug!(%peer, token = token.0, "connection accepted");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Hand a readable connection to the worker pool.
    fn dispatch(&mut self, token: Token) {
        let conn = match self.connections.lock().get(&token) {
            Some(conn) => Arc::clone(conn),
            None => return, // already closed
        };

        // Deregister first: with no interest set, no second worker can be
        // dispatched for this connection while the turn runs.
        {
            let mut guard = conn.lock();
            if let Err(e) = self.registry.deregister(&mut guard.stream) {
                tracing::warn!(peer = %guard.peer, error = %e, "deregister failed; closing");
                drop(guard);
                close_connection(token, &self.connections, &self.metrics);
                return;
            }
        }

        let context = DispatchContext {
            connections: Arc::clone(&self.connections),
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            metrics: Arc::clone(&self.metrics),
            max_value_size: self.max_value_size,
        };
        let job_conn = Arc::clone(&conn);
        let job = Box::new(move || run_turn_job(token, job_conn, context));

        if self.pool.try_execute(job).is_err() {
            // Pool saturated: back off and let the event come around again.
            self.metrics.record_dispatch_deferral();
            let mut guard = conn.lock();
            if self
                .registry
                .register(&mut guard.stream, token, Interest::READABLE)
                .is_err()
            {
                drop(guard);
                close_connection(token, &self.connections, &self.metrics);
            }
        }
    }
}

/// One worker turn: run the dispatcher, then re-arm or close.
fn run_turn_job(token: Token, conn: Arc<Mutex<Connection>>, context: DispatchContext) {
    let mut guard = conn.lock();

    let dispatcher = CommandDispatcher::new(
        context.cache.as_ref(),
        &context.metrics,
        context.max_value_size,
    );
    let Connection {
        stream,
        peer,
        framer,
    } = &mut *guard;
    let outcome = dispatcher.run_turn(stream, framer, *peer);

    match outcome {
        TurnOutcome::Continue => {
            if let Err(e) = context
                .registry
                .register(&mut guard.stream, token, Interest::READABLE)
            {
                tracing::warn!(peer = %guard.peer, error = %e, "re-arm failed; closing");
                drop(guard);
                close_connection(token, &context.connections, &context.metrics);
            }
        }
        TurnOutcome::Close => {
            tracing::debug!(peer = %guard.peer, "connection closed");
            drop(guard);
            close_connection(token, &context.connections, &context.metrics);
        }
    }
}

/// Remove a connection from the shared map; the stream closes when the
/// last reference drops.
fn close_connection(token: Token, connections: &ConnectionMap, metrics: &ServerMetrics) {
    if connections.lock().remove(&token).is_some() {
        metrics.record_connection_closed();
    }
}
