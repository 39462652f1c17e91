//! Log Record Format
//!
//! One executed mutating command per line, readable with `cat`:
//!
//! ```text
//! SET user:1 Ariz
//! SET session abc123 60
//! DEL user:1
//! ```
//!
//! The TTL field is written only when it is positive. Keys and values are
//! written verbatim; there is no escaping, so a value containing whitespace
//! does not survive a replay intact.

use std::fmt;
use thiserror::Error;

/// A mutating command as stored in the append-only log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Set {
        key: String,
        value: String,
        ttl_seconds: i64,
    },
    Del {
        key: String,
    },
}

/// Why a log line could not be turned into a [`LogRecord`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    /// A command other than `SET` or `DEL` (e.g. a stray `PUBLISH`)
    #[error("unsupported command '{0}'")]
    Unsupported(String),
    /// A `SET`/`DEL` line with missing or unparseable fields
    #[error("malformed record: {0}")]
    Malformed(String),
}

impl LogRecord {
    pub fn set(key: impl Into<String>, value: impl Into<String>, ttl_seconds: i64) -> Self {
        LogRecord::Set {
            key: key.into(),
            value: value.into(),
            ttl_seconds,
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        LogRecord::Del { key: key.into() }
    }

    /// Parses one log line.
    ///
    /// Returns `Ok(None)` for blank lines. The command word is matched
    /// case-insensitively; extra trailing fields are ignored.
    pub fn parse(line: &str) -> Result<Option<Self>, RecordError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(command) = parts.first() else {
            return Ok(None);
        };

        match command.to_ascii_uppercase().as_str() {
            "SET" => {
                if parts.len() < 3 {
                    return Err(RecordError::Malformed(format!(
                        "SET needs a key and a value: {}",
                        line.trim()
                    )));
                }
                let ttl_seconds = match parts.get(3) {
                    Some(ttl) => ttl.parse::<i64>().map_err(|_| {
                        RecordError::Malformed(format!("invalid TTL '{}'", ttl))
                    })?,
                    None => 0,
                };
                Ok(Some(LogRecord::set(parts[1], parts[2], ttl_seconds)))
            }
            "DEL" => match parts.get(1) {
                Some(key) => Ok(Some(LogRecord::del(*key))),
                None => Err(RecordError::Malformed("DEL needs a key".to_string())),
            },
            other => Err(RecordError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Set {
                key,
                value,
                ttl_seconds,
            } if *ttl_seconds > 0 => write!(f, "SET {} {} {}", key, value, ttl_seconds),
            LogRecord::Set { key, value, .. } => write!(f, "SET {} {}", key, value),
            LogRecord::Del { key } => write!(f, "DEL {}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert_eq!(LogRecord::set("k", "v", 0).to_string(), "SET k v");
        assert_eq!(LogRecord::set("k", "v", -3).to_string(), "SET k v");
        assert_eq!(LogRecord::set("k", "v", 60).to_string(), "SET k v 60");
        assert_eq!(LogRecord::del("k").to_string(), "DEL k");
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            LogRecord::parse("SET session abc 60"),
            Ok(Some(LogRecord::set("session", "abc", 60)))
        );
        assert_eq!(
            LogRecord::parse("set k v\r"),
            Ok(Some(LogRecord::set("k", "v", 0)))
        );
        assert_eq!(LogRecord::parse("DEL k"), Ok(Some(LogRecord::del("k"))));
        assert_eq!(LogRecord::parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_unsupported() {
        assert_eq!(
            LogRecord::parse("PUBLISH news hello"),
            Err(RecordError::Unsupported("PUBLISH".to_string()))
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            LogRecord::parse("SET onlykey"),
            Err(RecordError::Malformed(_))
        ));
        assert!(matches!(
            LogRecord::parse("SET k v soon"),
            Err(RecordError::Malformed(_))
        ));
        assert!(matches!(LogRecord::parse("DEL"), Err(RecordError::Malformed(_))));
    }
}
