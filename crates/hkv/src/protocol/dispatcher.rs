// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection command dispatch.
//!
//! A dispatcher turn runs on a worker thread after the acceptor saw the
//! connection readable. The turn parses as many complete commands as the
//! connection buffer holds, executes each against the cache, and writes the
//! responses. When the buffer runs out mid-command the turn ends and the
//! connection is re-armed; the partial command stays buffered and parsing
//! resumes on the next readiness event.
//!
//! Parsing is transactional: a command is consumed only once all of its
//! bytes are buffered. The one exception is an oversized `set` payload
//! (larger than the largest slot), which is drained incrementally and
//! answered with `NOT_STORED` without ever being held in memory.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use super::command::{
    self, parse_set_header, validate_key, ProtocolError, Request, RESP_END, RESP_NOT_STORED,
    RESP_STORED,
};
use super::framer::{FillOutcome, FramerError, LineFramer};
use crate::cache::{Cache, CacheValue, VALUE_HEADER_SIZE};
use crate::metrics::ServerMetrics;

/// What the connection should do after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Re-arm for read readiness; the connection stays open.
    Continue,

    /// Close the connection.
    Close,
}

/// Result of hunting for the next complete request.
enum Step {
    /// A full request is parsed and consumed.
    Request(Request),

    /// A `set` whose payload exceeds the largest slot; header consumed,
    /// payload still on the wire.
    Oversize {
        bytes: u32,
        noreply: bool,
        key_err: Option<ProtocolError>,
    },

    /// The socket has no more bytes right now; whatever is buffered is not
    /// a complete command.
    NotReady,

    /// Peer closed its half of the connection.
    PeerClosed,

    /// Client broke the protocol.
    Protocol(ProtocolError),

    /// Transport failed.
    Io(io::Error),
}

/// Outcome of one transactional parse attempt.
enum Parsed {
    Complete(Request),
    Oversize {
        bytes: u32,
        noreply: bool,
        key_err: Option<ProtocolError>,
    },
    NeedMore,
}

/// Executes requests from one connection against the cache.
pub struct CommandDispatcher<'a> {
    cache: &'a dyn Cache,
    metrics: &'a ServerMetrics,
    /// Largest serialized value any slab can hold; payloads past this are
    /// drained instead of buffered.
    max_value_size: usize,
}

impl<'a> CommandDispatcher<'a> {
    pub fn new(cache: &'a dyn Cache, metrics: &'a ServerMetrics, max_value_size: usize) -> Self {
        Self {
            cache,
            metrics,
            max_value_size,
        }
    }

    /// Run one turn: process every complete buffered command, then yield
    /// the connection back to the selector.
    pub fn run_turn<S: Read + Write>(
        &self,
        stream: &mut S,
        framer: &mut LineFramer,
        peer: SocketAddr,
    ) -> TurnOutcome {
        loop {
            match self.next_step(stream, framer) {
                Step::Request(request) => {
                    if self.execute(stream, request) == TurnOutcome::Close {
                        return TurnOutcome::Close;
                    }
                    if framer.is_empty() {
                        return TurnOutcome::Continue;
                    }
                    // Pipelined bytes already buffered: keep going, a
                    // readiness edge will not fire for them.
                }
                Step::Oversize {
                    bytes,
                    noreply,
                    key_err,
                } => match self.drain_oversize(stream, framer, bytes) {
                    Ok(()) => {
                        let response: Option<Vec<u8>> = match key_err {
                            Some(e) => {
                                self.metrics.record_protocol_error();
                                Some(e.response())
                            }
                            None if noreply => None,
                            None => Some(RESP_NOT_STORED.to_vec()),
                        };
                        if let Some(resp) = response {
                            if self.write_all(stream, &resp).is_err() {
                                return TurnOutcome::Close;
                            }
                        }
                        tracing::debug!(%peer, bytes, "oversized payload drained and refused");
                        if framer.is_empty() {
                            return TurnOutcome::Continue;
                        }
                    }
                    Err(outcome) => return outcome,
                },
                Step::NotReady => return TurnOutcome::Continue,
                Step::PeerClosed => {
                    // Silent close; no response owed.
                    return TurnOutcome::Close;
                }
                Step::Protocol(e) => {
                    self.metrics.record_protocol_error();
                    tracing::warn!(%peer, error = %e, "protocol violation");
                    let _ = self.write_all(stream, &e.response());
                    if e.closes_connection() {
                        return TurnOutcome::Close;
                    }
                    if framer.is_empty() {
                        return TurnOutcome::Continue;
                    }
                }
                Step::Io(e) => {
                    self.metrics.record_internal_error();
                    tracing::warn!(%peer, error = %e, "connection I/O failed");
                    let _ = self.write_all(stream, &command::server_error("io failure"));
                    return TurnOutcome::Close;
                }
            }
        }
    }

    /// Pull bytes until the buffer holds a complete command or the socket
    /// runs dry.
    fn next_step<S: Read>(&self, stream: &mut S, framer: &mut LineFramer) -> Step {
        loop {
            let mark = framer.mark();
            match self.try_parse(framer) {
                Ok(Parsed::Complete(request)) => return Step::Request(request),
                Ok(Parsed::Oversize {
                    bytes,
                    noreply,
                    key_err,
                }) => {
                    return Step::Oversize {
                        bytes,
                        noreply,
                        key_err,
                    }
                }
                Ok(Parsed::NeedMore) => framer.rewind(mark),
                Err(e) => return Step::Protocol(e),
            }

            match framer.fill(stream) {
                Ok(FillOutcome::Read(n)) => self.metrics.record_bytes_read(n),
                Ok(FillOutcome::WouldBlock) => return Step::NotReady,
                Ok(FillOutcome::PeerClosed) => return Step::PeerClosed,
                Err(e) => return Step::Io(e),
            }
        }
    }

    /// One transactional parse attempt against the buffered bytes.
    fn try_parse(&self, framer: &mut LineFramer) -> Result<Parsed, ProtocolError> {
        let verb: [u8; 4] = match framer.read_exact(4) {
            Some(v) => [v[0], v[1], v[2], v[3]],
            None => return Ok(Parsed::NeedMore),
        };

        match &verb {
            b"get " => {
                let key = match framer.read_line().map_err(framer_error)? {
                    Some(line) => line.to_vec(),
                    None => return Ok(Parsed::NeedMore),
                };
                validate_key(&key)?;
                Ok(Parsed::Complete(Request::Get { key }))
            }
            b"set " => {
                let key = match framer.read_token().map_err(framer_error)? {
                    Some(token) => token.to_vec(),
                    None => return Ok(Parsed::NeedMore),
                };
                let header = match framer.read_line().map_err(framer_error)? {
                    Some(line) => parse_set_header(line)?,
                    None => return Ok(Parsed::NeedMore),
                };
                let key_err = validate_key(&key).err();

                if VALUE_HEADER_SIZE + header.bytes as usize > self.max_value_size {
                    return Ok(Parsed::Oversize {
                        bytes: header.bytes,
                        noreply: header.noreply,
                        key_err,
                    });
                }

                let data = match framer.read_exact(header.bytes as usize) {
                    Some(data) => data.to_vec(),
                    None => return Ok(Parsed::NeedMore),
                };
                let terminator: [u8; 2] = match framer.read_exact(2) {
                    Some(t) => [t[0], t[1]],
                    None => return Ok(Parsed::NeedMore),
                };
                if &terminator != b"\r\n" {
                    return Err(ProtocolError::BadDataChunk);
                }

                if let Some(e) = key_err {
                    // Command fully consumed; the stream stays in sync.
                    return Err(e);
                }

                Ok(Parsed::Complete(Request::Set {
                    key,
                    flags: header.flags,
                    exptime: header.exptime,
                    noreply: header.noreply,
                    data,
                }))
            }
            _ => Err(ProtocolError::UnknownVerb),
        }
    }

    /// Execute a parsed request and write the response.
    fn execute<S: Write>(&self, stream: &mut S, request: Request) -> TurnOutcome {
        let result = match request {
            Request::Get { key } => match self.cache.get(&key) {
                Some(value) => self.write_all(stream, &command::render_value(&key, &value)),
                None => self.write_all(stream, RESP_END),
            },
            Request::Set {
                key,
                flags,
                exptime: _exptime, // carried but not honored; no expiry
                noreply,
                data,
            } => {
                let stored = self.cache.set(&key, &CacheValue::new(flags, data));
                if noreply {
                    Ok(())
                } else if stored {
                    self.write_all(stream, RESP_STORED)
                } else {
                    self.write_all(stream, RESP_NOT_STORED)
                }
            }
        };

        match result {
            Ok(()) => TurnOutcome::Continue,
            Err(_) => TurnOutcome::Close,
        }
    }

    /// Consume and discard an oversized payload plus its terminator.
    fn drain_oversize<S: Read>(
        &self,
        stream: &mut S,
        framer: &mut LineFramer,
        bytes: u32,
    ) -> Result<(), TurnOutcome> {
        let mut remaining = bytes as usize;
        loop {
            remaining -= framer.discard_up_to(remaining);
            if remaining == 0 {
                break;
            }
            self.blocking_fill(stream, framer)?;
        }

        // Terminator after the payload.
        loop {
            if let Some(t) = framer.read_exact(2) {
                if t != b"\r\n" {
                    self.metrics.record_protocol_error();
                    return Err(TurnOutcome::Close);
                }
                return Ok(());
            }
            self.blocking_fill(stream, framer)?;
        }
    }

    /// Fill, yielding on would-block. Only the drain path waits like this:
    /// the discarded bytes cannot be rewound, so the turn must finish the
    /// command.
    fn blocking_fill<S: Read>(
        &self,
        stream: &mut S,
        framer: &mut LineFramer,
    ) -> Result<(), TurnOutcome> {
        loop {
            match framer.fill(stream) {
                Ok(FillOutcome::Read(n)) => {
                    self.metrics.record_bytes_read(n);
                    return Ok(());
                }
                Ok(FillOutcome::WouldBlock) => std::thread::yield_now(),
                Ok(FillOutcome::PeerClosed) => return Err(TurnOutcome::Close),
                Err(_) => {
                    self.metrics.record_internal_error();
                    return Err(TurnOutcome::Close);
                }
            }
        }
    }

    /// Write the whole response, yielding on would-block.
    fn write_all<S: Write>(&self, stream: &mut S, mut data: &[u8]) -> io::Result<()> {
        let total = data.len();
        while !data.is_empty() {
            match stream.write(data) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    ))
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.metrics.record_bytes_written(total);
        Ok(())
    }
}

/// Framing violations map onto the line-level protocol error.
fn framer_error(_e: FramerError) -> ProtocolError {
    ProtocolError::BadLine
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod dispatcher_tests;
