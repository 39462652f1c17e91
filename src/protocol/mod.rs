//! Wire Protocol
//!
//! This module implements the text-oriented protocol LedgerKV speaks.
//!
//! ## Overview
//!
//! Requests arrive either as RESP-like multi-bulk frames (what `redis-cli`
//! sends) or as plain whitespace-separated lines (what `telnet`/`nc` users
//! type). Replies are status lines, bulk payloads, errors, or the nil marker.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` reply enum and its serialization
//! - `parser`: Incremental decoder for incoming requests
//!
//! ## Example
//!
//! ```
//! use ledgerkv::protocol::{parse_request, RespValue};
//!
//! let (request, _consumed) = parse_request(b"GET name\r\n").unwrap().unwrap();
//! assert_eq!(request.name, "GET");
//!
//! let reply = RespValue::bulk("Ariz");
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_request, ParseError, ParseResult, Request};
pub use types::RespValue;
