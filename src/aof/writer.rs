//! Append-Only Log Writer
//!
//! Every executed `SET`/`DEL` is written as one line to the end of the log.
//! Writers are serialized by a mutex so lines never interleave, and each
//! record is flushed out of the user-space buffer before `append` returns.
//!
//! ## Ordering
//!
//! The store commits a mutation under its own write lock and must then log
//! it without holding that lock. To keep the file in commit order, the
//! store takes a [`Ticket`] while it still holds its lock; tickets are
//! written strictly in the order they were issued, and a writer whose turn
//! has not come yet waits on a condition variable.
//!
//! ```text
//!   store write lock      log mutex
//!   ────────────────      ─────────
//!   insert k=A
//!   ticket #7  ─────────> wait for #7, write "SET k A"
//!   unlock
//!   insert k=B
//!   ticket #8  ─────────> wait for #8, write "SET k B"
//!   unlock
//! ```

use crate::aof::{AofConfig, AofError, FsyncPolicy, LogRecord};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How often `FsyncPolicy::EverySecond` syncs the file
const SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// A reserved position in the log.
///
/// Issued by [`AppendLog::reserve`]; must be passed to
/// [`AppendLog::append_reserved`] exactly once, or later writers will wait
/// forever.
#[derive(Debug)]
#[must_use = "an unused ticket blocks every later append"]
pub struct Ticket(u64);

struct LogWriter {
    file: BufWriter<File>,
    /// Ticket allowed to write next
    next: u64,
    last_sync: Instant,
}

/// The append-only command log.
pub struct AppendLog {
    path: PathBuf,
    fsync: FsyncPolicy,
    writer: Mutex<LogWriter>,
    turn: Condvar,
    issued: AtomicU64,
}

impl std::fmt::Debug for AppendLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendLog")
            .field("path", &self.path)
            .field("fsync", &self.fsync)
            .field("issued", &self.issued.load(Ordering::Relaxed))
            .finish()
    }
}

impl AppendLog {
    /// Opens (or creates) the log file for appending.
    pub fn open(config: &AofConfig) -> Result<Self, AofError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        info!(path = %config.path.display(), fsync = ?config.fsync, "Append-only log opened");

        Ok(Self {
            path: config.path.clone(),
            fsync: config.fsync,
            writer: Mutex::new(LogWriter {
                file: BufWriter::new(file),
                next: 0,
                last_sync: Instant::now(),
            }),
            turn: Condvar::new(),
            issued: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserves the next position in the log.
    pub fn reserve(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::SeqCst))
    }

    /// Appends a record at the end of the log.
    pub fn append(&self, record: &LogRecord) -> Result<(), AofError> {
        let ticket = self.reserve();
        self.append_reserved(ticket, record)
    }

    /// Writes `record` at the position held by `ticket`.
    ///
    /// Blocks until every earlier ticket has been written. The turn is
    /// passed on even when the write fails.
    pub fn append_reserved(&self, ticket: Ticket, record: &LogRecord) -> Result<(), AofError> {
        let mut writer = self.lock();
        while writer.next != ticket.0 {
            writer = self
                .turn
                .wait(writer)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let result = self.write_record(&mut writer, record);

        writer.next += 1;
        drop(writer);
        self.turn.notify_all();

        result
    }

    fn write_record(&self, writer: &mut LogWriter, record: &LogRecord) -> Result<(), AofError> {
        writeln!(writer.file, "{}", record)?;
        writer.file.flush()?;

        match self.fsync {
            FsyncPolicy::Always => {
                writer.file.get_ref().sync_data()?;
                writer.last_sync = Instant::now();
            }
            FsyncPolicy::EverySecond if writer.last_sync.elapsed() >= SYNC_INTERVAL => {
                writer.file.get_ref().sync_data()?;
                writer.last_sync = Instant::now();
                debug!("Append-only log synced");
            }
            _ => {}
        }

        Ok(())
    }

    /// Flushes buffered bytes and syncs the file to disk.
    ///
    /// Called on shutdown; safe to call at any time.
    pub fn flush(&self) -> Result<(), AofError> {
        let mut writer = self.lock();
        writer.file.flush()?;
        writer.file.get_ref().sync_all()?;
        writer.last_sync = Instant::now();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LogWriter> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
