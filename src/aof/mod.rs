//! Append-Only Log
//!
//! This module provides LedgerKV's durability: every executed `SET` and
//! `DEL` is appended to a flat text file, and on startup that file is
//! replayed into an empty store before any client is accepted.
//!
//! ## Modules
//!
//! - `record`: The line format of a single logged command
//! - `writer`: The serialized, ordered log writer
//! - `replay`: Startup reconstruction of the keyspace
//!
//! ## Example
//!
//! ```no_run
//! use ledgerkv::aof::{self, AofConfig, AppendLog};
//! use ledgerkv::storage::Store;
//! use std::sync::Arc;
//!
//! let config = AofConfig::default();
//! let store = Store::new();
//! let report = aof::replay(&config.path, &store, config.replay).unwrap();
//! println!("replayed {} records", report.applied);
//!
//! let log = Arc::new(AppendLog::open(&config).unwrap());
//! let store = Arc::new(store.with_log(log));
//! ```

pub mod record;
pub mod replay;
pub mod writer;

use std::path::PathBuf;
use thiserror::Error;

pub use record::{LogRecord, RecordError};
pub use replay::{replay, replay_from, ReplayReport};
pub use writer::{AppendLog, Ticket};

/// Default log file name
pub const DEFAULT_AOF_PATH: &str = "appendonly.aof";

/// When the log file is synced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// After every record
    Always,
    /// At most once per second, piggybacked on appends
    #[default]
    EverySecond,
    /// Never explicitly; the OS decides
    Never,
}

/// What replay does with a line it cannot execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    /// Abort startup with an error
    Strict,
    /// Log a warning, skip the line and continue
    #[default]
    Lenient,
}

/// Configuration for the append-only log.
#[derive(Debug, Clone)]
pub struct AofConfig {
    pub path: PathBuf,
    pub fsync: FsyncPolicy,
    pub replay: ReplayPolicy,
}

impl Default for AofConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_AOF_PATH),
            fsync: FsyncPolicy::default(),
            replay: ReplayPolicy::default(),
        }
    }
}

/// Errors from opening, writing or replaying the log.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("append-only log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot replay line {line}: {reason}")]
    Replay { line: u64, reason: String },
}
