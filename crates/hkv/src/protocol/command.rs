// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text protocol requests and responses.
//!
//! Two commands, both lines terminated by `\r\n`:
//!
//! ```text
//! get <key>\r\n
//! set <key> <flags> <exptime> <bytes> [noreply]\r\n<data:bytes>\r\n
//! ```
//!
//! Keys are opaque bytes, 1..=250 long, no spaces, no control characters.
//! `exptime` is parsed and carried but the cache ignores it. `noreply`
//! suppresses the success/refusal response; error responses are always
//! sent.

use std::fmt;

use crate::cache::CacheValue;

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 250;

/// Canned responses.
pub const RESP_STORED: &[u8] = b"STORED\r\n";
pub const RESP_NOT_STORED: &[u8] = b"NOT_STORED\r\n";
pub const RESP_END: &[u8] = b"END\r\n";
pub const RESP_ERROR: &[u8] = b"ERROR\r\n";

/// A fully parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get {
        key: Vec<u8>,
    },
    Set {
        key: Vec<u8>,
        flags: u16,
        /// Accepted for wire compatibility; the cache has no expiry.
        exptime: i64,
        noreply: bool,
        data: Vec<u8>,
    },
}

/// Parsed fields of a `set` command line, before the payload is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetHeader {
    pub flags: u16,
    pub exptime: i64,
    pub bytes: u32,
    pub noreply: bool,
}

/// Client-visible protocol violations.
///
/// `closes_connection` distinguishes violations after which the byte
/// stream is still in sync (the whole command was consumed) from those
/// that leave the parser desynchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// First four bytes were neither `get ` nor `set `.
    UnknownVerb,

    /// Key failed validation (length, space, control characters).
    BadKey(&'static str),

    /// An integer field did not parse.
    BadInteger(&'static str),

    /// Wrong number of fields on the `set` line.
    WrongArgumentCount,

    /// Malformed line framing (stray `\r`, unterminated field).
    BadLine,

    /// Payload not terminated by `\r\n`.
    BadDataChunk,
}

impl ProtocolError {
    /// Bytes to send back for this violation.
    pub fn response(&self) -> Vec<u8> {
        match self {
            Self::UnknownVerb => RESP_ERROR.to_vec(),
            Self::BadKey(msg) => client_error(msg),
            Self::BadInteger(field) => client_error(&format!("bad {} value", field)),
            Self::WrongArgumentCount => client_error("wrong number of arguments"),
            Self::BadLine => client_error("malformed line"),
            Self::BadDataChunk => client_error("bad data chunk"),
        }
    }

    /// Whether the connection must close after responding. True whenever
    /// the parser can no longer tell where the next command starts.
    pub fn closes_connection(&self) -> bool {
        match self {
            Self::UnknownVerb => true,
            Self::BadKey(_) => false,
            Self::BadInteger(_) => true,
            Self::WrongArgumentCount => true,
            Self::BadLine => true,
            Self::BadDataChunk => true,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVerb => write!(f, "unknown command verb"),
            Self::BadKey(msg) => write!(f, "{}", msg),
            Self::BadInteger(field) => write!(f, "bad {} value", field),
            Self::WrongArgumentCount => write!(f, "wrong number of arguments"),
            Self::BadLine => write!(f, "malformed line"),
            Self::BadDataChunk => write!(f, "bad data chunk"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// `CLIENT_ERROR <msg>\r\n`
pub fn client_error(msg: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(14 + msg.len() + 2);
    out.extend_from_slice(b"CLIENT_ERROR ");
    out.extend_from_slice(msg.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// `SERVER_ERROR <msg>\r\n`
pub fn server_error(msg: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(14 + msg.len() + 2);
    out.extend_from_slice(b"SERVER_ERROR ");
    out.extend_from_slice(msg.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// `VALUE <key> <flags> <bytes>\r\n<data>\r\nEND\r\n`
pub fn render_value(key: &[u8], value: &CacheValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + value.data.len() + 32);
    out.extend_from_slice(b"VALUE ");
    out.extend_from_slice(key);
    out.extend_from_slice(format!(" {} {}\r\n", value.flags, value.data.len()).as_bytes());
    out.extend_from_slice(&value.data);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(RESP_END);
    out
}

/// Validate a key against the protocol rules.
pub fn validate_key(key: &[u8]) -> Result<(), ProtocolError> {
    if key.is_empty() {
        return Err(ProtocolError::BadKey("empty key"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ProtocolError::BadKey("key too long"));
    }
    if key.iter().any(|&b| b == b' ' || b < 0x20 || b == 0x7F) {
        return Err(ProtocolError::BadKey("invalid key"));
    }
    Ok(())
}

/// Parse `<flags> <exptime> <bytes> [noreply]` (the `set` line after the
/// key token).
pub fn parse_set_header(line: &[u8]) -> Result<SetHeader, ProtocolError> {
    let fields: Vec<&[u8]> = line.split(|&b| b == b' ').collect();

    let noreply = match fields.len() {
        3 => false,
        4 => {
            if fields[3] != b"noreply" {
                return Err(ProtocolError::WrongArgumentCount);
            }
            true
        }
        _ => return Err(ProtocolError::WrongArgumentCount),
    };

    let flags = parse_int::<u16>(fields[0], "flags")?;
    let exptime = parse_int::<i64>(fields[1], "exptime")?;
    let bytes = parse_int::<u32>(fields[2], "bytes")?;

    Ok(SetHeader {
        flags,
        exptime,
        bytes,
        noreply,
    })
}

fn parse_int<T: std::str::FromStr>(
    field: &[u8],
    name: &'static str,
) -> Result<T, ProtocolError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ProtocolError::BadInteger(name))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_normal_keys() {
        assert!(validate_key(b"foo").is_ok());
        assert!(validate_key(b"user:1234:session").is_ok());
        assert!(validate_key(&[b'k'; MAX_KEY_LEN]).is_ok());
        // Non-ASCII bytes are opaque and allowed.
        assert!(validate_key(&[0xC3, 0xA9]).is_ok());
    }

    #[test]
    fn test_validate_key_rejections() {
        assert!(validate_key(b"").is_err());
        assert!(validate_key(&[b'k'; MAX_KEY_LEN + 1]).is_err());
        assert!(validate_key(b"has space").is_err());
        assert!(validate_key(b"has\ttab").is_err());
        assert!(validate_key(b"has\x01ctrl").is_err());
        assert!(validate_key(&[b'a', 0x7F]).is_err());
    }

    #[test]
    fn test_parse_set_header() {
        let h = parse_set_header(b"1 0 5").expect("header should parse");
        assert_eq!(
            h,
            SetHeader {
                flags: 1,
                exptime: 0,
                bytes: 5,
                noreply: false
            }
        );
    }

    #[test]
    fn test_parse_set_header_noreply() {
        let h = parse_set_header(b"65535 -1 0 noreply").expect("header should parse");
        assert_eq!(h.flags, 65535);
        assert_eq!(h.exptime, -1);
        assert_eq!(h.bytes, 0);
        assert!(h.noreply);
    }

    #[test]
    fn test_parse_set_header_errors() {
        assert_eq!(
            parse_set_header(b"1 0"),
            Err(ProtocolError::WrongArgumentCount)
        );
        assert_eq!(
            parse_set_header(b"1 0 5 yesplease"),
            Err(ProtocolError::WrongArgumentCount)
        );
        assert_eq!(
            parse_set_header(b"1 0 5 noreply extra"),
            Err(ProtocolError::WrongArgumentCount)
        );
        assert_eq!(
            parse_set_header(b"99999 0 5"),
            Err(ProtocolError::BadInteger("flags"))
        );
        assert_eq!(
            parse_set_header(b"1 0 -5"),
            Err(ProtocolError::BadInteger("bytes"))
        );
        assert_eq!(
            parse_set_header(b"1 x 5"),
            Err(ProtocolError::BadInteger("exptime"))
        );
        // Double space yields an empty field.
        assert_eq!(
            parse_set_header(b"1  0 5"),
            Err(ProtocolError::WrongArgumentCount)
        );
    }

    #[test]
    fn test_render_value() {
        let v = CacheValue::new(1, b"hello".to_vec());
        assert_eq!(
            render_value(b"foo", &v),
            b"VALUE foo 1 5\r\nhello\r\nEND\r\n".to_vec()
        );
    }

    #[test]
    fn test_render_value_empty_payload() {
        let v = CacheValue::new(0, Vec::new());
        assert_eq!(
            render_value(b"empty", &v),
            b"VALUE empty 0 0\r\n\r\nEND\r\n".to_vec()
        );
    }

    #[test]
    fn test_error_responses() {
        assert_eq!(ProtocolError::UnknownVerb.response(), b"ERROR\r\n".to_vec());
        assert_eq!(
            ProtocolError::BadKey("key too long").response(),
            b"CLIENT_ERROR key too long\r\n".to_vec()
        );
        assert!(ProtocolError::UnknownVerb.closes_connection());
        assert!(!ProtocolError::BadKey("invalid key").closes_connection());
        assert!(ProtocolError::BadInteger("bytes").closes_connection());
        assert!(ProtocolError::BadDataChunk.closes_connection());
    }
}
