//! Request Decoder
//!
//! This module turns the bytes a client sends into a [`Request`]: a command
//! name plus its ordered arguments. Two framings share the same stream and
//! are told apart by the first byte, which is inspected but not consumed:
//!
//! - **Multi-bulk**: `*<N>\r\n` followed by N pairs of `$<len>\r\n` and the
//!   argument's own line. The announced length is only checked for shape;
//!   the argument ends at its line break and trailing whitespace is trimmed.
//! - **Plain line**: anything else. One line is read, trimmed and split on
//!   runs of whitespace.
//!
//! ## How the Decoder Works
//!
//! [`parse_request`] reads from a buffer and returns either:
//! - `Ok(Some((request, consumed)))` - a full request, `consumed` bytes were used
//! - `Ok(None)` - the request is incomplete, read more and retry
//! - `Err(ParseError)` - the input can never become a valid request
//!
//! The decoder keeps no state between calls, so the caller can retry with a
//! longer buffer after every socket read. Hitting end-of-stream while the
//! decoder still reports `Ok(None)` is the caller's decode error.

use crate::protocol::types::prefix;
use thiserror::Error;

/// Errors that can occur while decoding a request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A plain line that is empty after trimming, or `*0`
    #[error("empty command")]
    EmptyCommand,

    /// The `*<N>` header is not a usable argument count
    #[error("invalid multi-bulk count: {0}")]
    InvalidCount(String),

    /// The `$<len>` line is not a non-negative integer
    #[error("invalid bulk length: {0}")]
    InvalidLength(String),

    /// An argument was not preceded by a `$<len>` line
    #[error("expected '$', got: {0}")]
    ExpectedBulkLength(String),

    /// Arguments must be UTF-8 strings
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),
}

/// Result type for decoding operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Largest argument count accepted in a multi-bulk header.
pub const MAX_ARGS: usize = 1024 * 1024;

/// One decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The command name exactly as sent (not case-normalized)
    pub name: String,
    /// Arguments after the command name, in order
    pub args: Vec<String>,
}

impl Request {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    fn from_words(mut words: Vec<String>) -> ParseResult<Self> {
        if words.is_empty() {
            return Err(ParseError::EmptyCommand);
        }
        let name = words.remove(0);
        Ok(Self { name, args: words })
    }
}

/// Attempts to decode one request from the front of `buf`.
///
/// # Example
///
/// ```
/// use ledgerkv::protocol::parse_request;
///
/// let (request, consumed) = parse_request(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(request.name, "GET");
/// assert_eq!(request.args, vec!["name".to_string()]);
/// assert_eq!(consumed, 23);
/// ```
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    match buf.first() {
        None => Ok(None),
        Some(&prefix::MULTI_BULK) => parse_multi_bulk(buf),
        Some(_) => parse_plain_line(buf),
    }
}

/// Parses `*<N>\r\n` followed by N `$<len>\r\n<arg>\r\n` pairs.
fn parse_multi_bulk(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    debug_assert!(buf[0] == prefix::MULTI_BULK);

    let (header, mut consumed) = match read_line(buf, 0)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let count_str = header[1..].trim();
    let count: i64 = count_str
        .parse()
        .map_err(|_| ParseError::InvalidCount(count_str.to_string()))?;
    if count < 0 || count as u64 > MAX_ARGS as u64 {
        return Err(ParseError::InvalidCount(count_str.to_string()));
    }
    if count == 0 {
        return Err(ParseError::EmptyCommand);
    }

    let count = count as usize;
    let mut words = Vec::with_capacity(count.min(64));

    for _ in 0..count {
        let (length_line, after_length) = match read_line(buf, consumed)? {
            Some(line) => line,
            None => return Ok(None),
        };

        let length_line = length_line.trim();
        let length_str = length_line
            .strip_prefix('$')
            .ok_or_else(|| ParseError::ExpectedBulkLength(length_line.to_string()))?;
        length_str
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidLength(length_str.to_string()))?;

        let (data_line, after_data) = match read_line(buf, after_length)? {
            Some(line) => line,
            None => return Ok(None),
        };

        words.push(data_line.trim_end().to_string());
        consumed = after_data;
    }

    Ok(Some((Request::from_words(words)?, consumed)))
}

/// Parses a whitespace-separated line such as `SET key value`.
fn parse_plain_line(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    let (line, consumed) = match read_line(buf, 0)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();

    Ok(Some((Request::from_words(words)?, consumed)))
}

/// Reads the line starting at `start`, up to and including its `\n`.
///
/// Returns the line without the `\n` (a `\r` before it is left in place for
/// the caller's trim) and the offset just past the `\n`.
fn read_line(buf: &[u8], start: usize) -> ParseResult<Option<(&str, usize)>> {
    let rest = match buf.get(start..) {
        Some(rest) => rest,
        None => return Ok(None),
    };

    match find_newline(rest) {
        Some(pos) => {
            let line = std::str::from_utf8(&rest[..pos])
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((line, start + pos + 1)))
        }
        None => Ok(None),
    }
}

#[inline]
fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}
