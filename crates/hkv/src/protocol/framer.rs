// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffered line framer for the text protocol.
//!
//! TCP is a stream; the framer accumulates whatever the socket has and
//! offers consuming primitives over the accumulated bytes:
//!
//! - [`LineFramer::read_line`] / [`LineFramer::read_token`] -- a field
//!   terminated by CRLF or by a single space, excluding the delimiter
//! - [`LineFramer::read_exact`] -- a fixed-length payload
//!
//! All return `None` when the buffer does not yet hold enough bytes; the
//! caller refills with [`LineFramer::fill`] and retries. The framer never
//! consumes bytes past the current command: anything following it stays
//! buffered for the next turn.
//!
//! A `\r` that is not followed by `\n` inside a delimiter-terminated field
//! is a protocol violation, as is a field that exceeds the buffer bound
//! without its delimiter arriving.

use std::fmt;
use std::io::{self, Read};

/// Read chunk size per fill call.
const FILL_CHUNK: usize = 4096;

/// Outcome of a [`LineFramer::fill`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// `n` fresh bytes were appended.
    Read(usize),

    /// The socket has nothing right now (non-blocking read would block).
    WouldBlock,

    /// End of stream: the peer closed its half of the connection.
    PeerClosed,
}

/// Framing errors. These are protocol violations, not I/O failures; I/O
/// errors surface from [`LineFramer::fill`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerError {
    /// A delimiter prefix (`\r`) was followed by the wrong byte.
    DelimiterMismatch,

    /// A field exceeded the buffer bound with no delimiter in sight.
    FieldTooLong { limit: usize },
}

impl fmt::Display for FramerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DelimiterMismatch => write!(f, "bad line terminator"),
            Self::FieldTooLong { limit } => {
                write!(f, "field exceeds {} bytes without terminator", limit)
            }
        }
    }
}

impl std::error::Error for FramerError {}

/// Accumulating reader over a non-blocking byte stream.
pub struct LineFramer {
    buf: Vec<u8>,
    /// Consumed prefix of `buf`; bytes before this are dead.
    pos: usize,
    /// Upper bound on live (unconsumed) bytes.
    max_buffered: usize,
}

impl LineFramer {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            buf: Vec::with_capacity(FILL_CHUNK),
            pos: 0,
            max_buffered,
        }
    }

    /// Unconsumed bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.buffered() == 0
    }

    /// Cursor for transactional parsing: remember before attempting a
    /// command, [`rewind`](Self::rewind) when it turns out incomplete.
    pub fn mark(&self) -> usize {
        self.pos
    }

    /// Roll the cursor back to an earlier [`mark`](Self::mark).
    ///
    /// Only valid between a mark and the next `fill` (filling may compact
    /// the buffer, which invalidates older marks).
    pub fn rewind(&mut self, mark: usize) {
        debug_assert!(mark <= self.pos, "rewind must move backwards");
        self.pos = mark;
    }

    /// Pull whatever the stream has into the buffer.
    pub fn fill<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<FillOutcome> {
        self.compact();

        let mut chunk = [0u8; FILL_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(FillOutcome::PeerClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(FillOutcome::Read(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FillOutcome::WouldBlock);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume and return a field terminated by `\r\n`, excluding the
    /// terminator. `Ok(None)` means the terminator has not arrived yet.
    pub fn read_line(&mut self) -> Result<Option<&[u8]>, FramerError> {
        let live = &self.buf[self.pos..];

        let mut i = 0;
        while i < live.len() {
            if live[i] == b'\r' {
                match live.get(i + 1) {
                    Some(&b'\n') => {
                        let start = self.pos;
                        self.pos += i + 2;
                        return Ok(Some(&self.buf[start..start + i]));
                    }
                    Some(_) => return Err(FramerError::DelimiterMismatch),
                    None => break, // partial terminator; need one more byte
                }
            }
            i += 1;
        }

        if self.buffered() > self.max_buffered {
            return Err(FramerError::FieldTooLong {
                limit: self.max_buffered,
            });
        }
        Ok(None)
    }

    /// Consume and return a field terminated by a single space. A line
    /// break before the space means the field's delimiter never arrives.
    pub fn read_token(&mut self) -> Result<Option<&[u8]>, FramerError> {
        let live = &self.buf[self.pos..];

        for (i, &b) in live.iter().enumerate() {
            if b == b' ' {
                let start = self.pos;
                self.pos += i + 1;
                return Ok(Some(&self.buf[start..start + i]));
            }
            if b == b'\r' || b == b'\n' {
                return Err(FramerError::DelimiterMismatch);
            }
        }

        if self.buffered() > self.max_buffered {
            return Err(FramerError::FieldTooLong {
                limit: self.max_buffered,
            });
        }
        Ok(None)
    }

    /// Consume and return exactly `n` bytes, or `None` until they are all
    /// buffered.
    pub fn read_exact(&mut self, n: usize) -> Option<&[u8]> {
        if self.buffered() < n {
            return None;
        }
        let start = self.pos;
        self.pos += n;
        Some(&self.buf[start..start + n])
    }

    /// Consume up to `n` already-buffered bytes, returning how many were
    /// discarded. Used to drain oversized payloads without holding them.
    pub fn discard_up_to(&mut self, n: usize) -> usize {
        let take = self.buffered().min(n);
        self.pos += take;
        take
    }

    /// Drop the consumed prefix once it dominates the buffer.
    fn compact(&mut self) {
        if self.pos > 0 && self.pos >= self.buf.len() / 2 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framer_with(data: &[u8]) -> LineFramer {
        let mut framer = LineFramer::new(1024);
        let mut cursor = Cursor::new(data.to_vec());
        match framer.fill(&mut cursor).expect("fill from cursor") {
            FillOutcome::Read(n) => assert_eq!(n, data.len().min(FILL_CHUNK)),
            other => panic!("expected Read, got {:?}", other),
        }
        framer
    }

    #[test]
    fn test_read_line_basic() {
        let mut framer = framer_with(b"hello world\r\nrest");
        assert_eq!(framer.read_line().unwrap(), Some(b"hello world".as_slice()));
        assert_eq!(framer.buffered(), 4); // "rest" stays for the next command
    }

    #[test]
    fn test_read_line_empty_field() {
        let mut framer = framer_with(b"\r\n");
        assert_eq!(framer.read_line().unwrap(), Some(b"".as_slice()));
        assert!(framer.is_empty());
    }

    #[test]
    fn test_read_line_incomplete() {
        let mut framer = framer_with(b"no terminator yet");
        assert_eq!(framer.read_line().unwrap(), None);
        assert_eq!(framer.buffered(), 17);
    }

    #[test]
    fn test_partial_terminator_waits_for_next_byte() {
        let mut framer = framer_with(b"field\r");
        assert_eq!(framer.read_line().unwrap(), None);

        let mut rest = Cursor::new(b"\n".to_vec());
        framer.fill(&mut rest).expect("fill");
        assert_eq!(framer.read_line().unwrap(), Some(b"field".as_slice()));
    }

    #[test]
    fn test_bare_carriage_return_is_violation() {
        let mut framer = framer_with(b"bad\rfield\r\n");
        assert_eq!(framer.read_line(), Err(FramerError::DelimiterMismatch));
    }

    #[test]
    fn test_read_token() {
        let mut framer = framer_with(b"key rest of line\r\n");
        assert_eq!(framer.read_token().unwrap(), Some(b"key".as_slice()));
        assert_eq!(framer.read_line().unwrap(), Some(b"rest of line".as_slice()));
    }

    #[test]
    fn test_read_token_stops_at_line_break() {
        // A token whose space never arrives before the line ends.
        let mut framer = framer_with(b"loner\r\n");
        assert_eq!(framer.read_token(), Err(FramerError::DelimiterMismatch));
    }

    #[test]
    fn test_read_exact_waits_for_full_payload() {
        let mut framer = framer_with(b"abc");
        assert_eq!(framer.read_exact(5), None);

        let mut rest = Cursor::new(b"de-tail".to_vec());
        framer.fill(&mut rest).expect("fill");
        assert_eq!(framer.read_exact(5), Some(b"abcde".as_slice()));
        assert_eq!(framer.buffered(), 5); // "-tail"
    }

    #[test]
    fn test_mark_and_rewind() {
        let mut framer = framer_with(b"get somekey\r\n");
        let mark = framer.mark();

        assert_eq!(framer.read_token().unwrap(), Some(b"get".as_slice()));
        framer.rewind(mark);

        // The whole command is parseable again from the mark.
        assert_eq!(framer.read_token().unwrap(), Some(b"get".as_slice()));
        assert_eq!(framer.read_line().unwrap(), Some(b"somekey".as_slice()));
    }

    #[test]
    fn test_field_too_long() {
        let mut framer = LineFramer::new(8);
        let mut cursor = Cursor::new(vec![b'x'; 32]);
        framer.fill(&mut cursor).expect("fill");

        assert_eq!(
            framer.read_line(),
            Err(FramerError::FieldTooLong { limit: 8 })
        );
    }

    #[test]
    fn test_discard_up_to() {
        let mut framer = framer_with(b"0123456789");
        assert_eq!(framer.discard_up_to(4), 4);
        assert_eq!(framer.discard_up_to(100), 6);
        assert_eq!(framer.discard_up_to(100), 0);
    }

    #[test]
    fn test_peer_closed_and_would_block() {
        struct Script(Vec<io::Result<Vec<u8>>>);
        impl Read for Script {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.pop() {
                    Some(Ok(data)) => {
                        buf[..data.len()].copy_from_slice(&data);
                        Ok(data.len())
                    }
                    Some(Err(e)) => Err(e),
                    None => Ok(0),
                }
            }
        }

        let mut framer = LineFramer::new(1024);

        let mut blocked = Script(vec![Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "nothing yet",
        ))]);
        assert_eq!(
            framer.fill(&mut blocked).expect("fill"),
            FillOutcome::WouldBlock
        );

        let mut closed = Script(Vec::new());
        assert_eq!(
            framer.fill(&mut closed).expect("fill"),
            FillOutcome::PeerClosed
        );
    }

    #[test]
    fn test_interleaved_commands_keep_boundaries() {
        let mut framer = framer_with(b"get a\r\nget b\r\n");

        assert_eq!(framer.read_token().unwrap(), Some(b"get".as_slice()));
        assert_eq!(framer.read_line().unwrap(), Some(b"a".as_slice()));
        assert_eq!(framer.read_token().unwrap(), Some(b"get".as_slice()));
        assert_eq!(framer.read_line().unwrap(), Some(b"b".as_slice()));
        assert!(framer.is_empty());
    }
}
