//! Response Types
//!
//! This module defines the replies LedgerKV writes back to clients.
//! Every reply is one of three wire shapes, plus the nil marker used
//! when a key has no value.
//!
//! ## Protocol Format
//!
//! Each reply starts with a type prefix byte:
//! - `+` Status
//! - `-` Error
//! - `$` Bulk payload
//!
//! All replies are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command 'FOO'\r\n`
//! Bulk payload: `$5\r\nhello\r\n`
//! Empty bulk payload: `$0\r\n\r\n`
//! Nil: `$-1\r\n`

use std::fmt;

/// The CRLF terminator used by every reply
pub const CRLF: &[u8] = b"\r\n";

/// Wire prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const BULK: u8 = b'$';
    pub const MULTI_BULK: u8 = b'*';
}

/// A reply sent to a client.
///
/// A missing key is always encoded as [`RespValue::Null`] (`$-1\r\n`), never
/// as an empty bulk payload, so clients can tell an empty string apart from
/// an absent key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line, e.g. `+OK\r\n`. Must not contain CRLF.
    Status(String),

    /// Error line, e.g. `-ERR syntax error\r\n`. Must not contain CRLF.
    Error(String),

    /// Length-prefixed payload: `$<len>\r\n<data>\r\n`, where `len` is the
    /// exact byte length of `data`.
    Bulk(String),

    /// No value: `$-1\r\n`
    Null,
}

impl RespValue {
    /// Creates a new status reply.
    ///
    /// # Example
    /// ```
    /// use ledgerkv::protocol::RespValue;
    /// let ok = RespValue::status("OK");
    /// assert_eq!(ok.serialize(), b"+OK\r\n");
    /// ```
    pub fn status(s: impl Into<String>) -> Self {
        RespValue::Status(s.into())
    }

    /// Creates a new error reply.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates a new bulk reply.
    ///
    /// # Example
    /// ```
    /// use ledgerkv::protocol::RespValue;
    /// let bulk = RespValue::bulk("héllo");
    /// assert_eq!(bulk.serialize(), "$6\r\nhéllo\r\n".as_bytes());
    /// ```
    pub fn bulk(data: impl Into<String>) -> Self {
        RespValue::Bulk(data.into())
    }

    /// Creates a nil reply.
    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn ok() -> Self {
        RespValue::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::Status("PONG".to_string())
    }

    /// Serializes the reply to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Bulk(data) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::Status(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Bulk(data) => write!(f, "\"{}\"", data),
            RespValue::Null => write!(f, "(nil)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialize() {
        assert_eq!(RespValue::status("OK").serialize(), b"+OK\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = RespValue::error("ERR unknown command 'FOO'");
        assert_eq!(value.serialize(), b"-ERR unknown command 'FOO'\r\n");
    }

    #[test]
    fn test_bulk_serialize() {
        assert_eq!(RespValue::bulk("hello").serialize(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_bulk_length_counts_bytes_not_chars() {
        // "ü" is two bytes in UTF-8
        assert_eq!(RespValue::bulk("über").serialize(), "$5\r\nüber\r\n".as_bytes());
    }

    #[test]
    fn test_empty_bulk_is_distinct_from_null() {
        assert_eq!(RespValue::bulk("").serialize(), b"$0\r\n\r\n");
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
        assert_ne!(RespValue::bulk(""), RespValue::null());
    }

    #[test]
    fn test_ok_and_pong() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
    }

    #[test]
    fn test_display() {
        assert_eq!(RespValue::bulk("bar").to_string(), "\"bar\"");
        assert_eq!(RespValue::null().to_string(), "(nil)");
        assert_eq!(RespValue::error("ERR x").to_string(), "(error) ERR x");
    }
}
