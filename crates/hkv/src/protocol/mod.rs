// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memcached text protocol: framing, parsing, and dispatch.
//!
//! [`framer::LineFramer`] turns a non-blocking byte stream into delimited
//! fields and fixed-length payloads; [`command`] defines the request and
//! response shapes; [`dispatcher::CommandDispatcher`] runs one connection
//! turn (parse, execute against the cache, reply).

pub mod command;
pub mod dispatcher;
pub mod framer;

pub use command::{ProtocolError, Request, MAX_KEY_LEN};
pub use dispatcher::{CommandDispatcher, TurnOutcome};
pub use framer::{FillOutcome, FramerError, LineFramer};
