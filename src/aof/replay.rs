//! Startup Replay
//!
//! Rebuilds the keyspace by re-running every record of a prior log, in file
//! order, through the same `Store::set`/`Store::delete` calls that live
//! commands use. Replay runs against a store that has no log attached, so
//! nothing is written back while reading.
//!
//! TTLs are applied relative to the moment of replay, exactly as if the
//! command had just been received.

use crate::aof::{AofError, LogRecord, RecordError, ReplayPolicy};
use crate::storage::Store;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// What a replay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records re-executed against the store
    pub applied: u64,
    /// Lines skipped under [`ReplayPolicy::Lenient`]
    pub skipped: u64,
}

/// Replays the log at `path` into `store`.
///
/// A missing file is treated as an empty log.
pub fn replay(path: &Path, store: &Store, policy: ReplayPolicy) -> Result<ReplayReport, AofError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No append-only log found, starting empty");
            return Ok(ReplayReport::default());
        }
        Err(e) => return Err(e.into()),
    };

    replay_from(BufReader::new(file), store, policy)
}

/// Replays log lines read from `reader` into `store`.
pub fn replay_from<R: BufRead>(
    mut reader: R,
    store: &Store,
    policy: ReplayPolicy,
) -> Result<ReplayReport, AofError> {
    let mut report = ReplayReport::default();
    let mut raw = Vec::new();
    let mut line_no = 0u64;

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        line_no += 1;

        let parsed = std::str::from_utf8(&raw)
            .map_err(|e| RecordError::Malformed(e.to_string()))
            .and_then(LogRecord::parse);

        match parsed {
            Ok(Some(record)) => {
                apply(store, record)?;
                report.applied += 1;
            }
            Ok(None) => {}
            Err(reason) => match policy {
                ReplayPolicy::Strict => {
                    return Err(AofError::Replay {
                        line: line_no,
                        reason: reason.to_string(),
                    });
                }
                ReplayPolicy::Lenient => {
                    let content = String::from_utf8_lossy(&raw);
                    warn!(
                        line = line_no,
                        content = %content.trim_end(),
                        %reason,
                        "Skipping log record"
                    );
                    report.skipped += 1;
                }
            },
        }
    }

    Ok(report)
}

fn apply(store: &Store, record: LogRecord) -> Result<(), AofError> {
    match record {
        LogRecord::Set {
            key,
            value,
            ttl_seconds,
        } => store.set(key, value, ttl_seconds),
        LogRecord::Del { key } => store.delete(&key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aof::{AofConfig, AppendLog};
    use std::io::Cursor;
    use std::sync::Arc;

    fn replay_str(input: &str, policy: ReplayPolicy) -> (Store, Result<ReplayReport, AofError>) {
        let store = Store::new();
        let result = replay_from(Cursor::new(input.as_bytes()), &store, policy);
        (store, result)
    }

    #[test]
    fn test_replay_set_and_del() {
        let (store, result) = replay_str(
            "SET a 1\nSET b 2\nDEL a\nSET b 3\n",
            ReplayPolicy::Strict,
        );
        assert_eq!(
            result.unwrap(),
            ReplayReport {
                applied: 4,
                skipped: 0
            }
        );
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some("3".to_string()));
    }

    #[test]
    fn test_replay_ttl_restarts_from_now() {
        let (store, result) = replay_str("SET session abc 60\n", ReplayPolicy::Strict);
        result.unwrap();
        assert_eq!(store.get("session"), Some("abc".to_string()));
        let ttl = store.ttl("session").unwrap().unwrap();
        assert!(ttl.as_secs() > 55 && ttl.as_secs() <= 60);
    }

    #[test]
    fn test_replay_huge_ttl() {
        let (store, result) = replay_str("SET k v 9223372036854775807\n", ReplayPolicy::Strict);
        assert_eq!(
            result.unwrap(),
            ReplayReport {
                applied: 1,
                skipped: 0
            }
        );
        assert_eq!(store.get("k"), Some("v".to_string()));
        assert_eq!(store.ttl("k"), Some(None));
    }

    #[test]
    fn test_lenient_skips_unsupported() {
        let (store, result) = replay_str(
            "SET a 1\nPUBLISH news hello\nSET b 2\n",
            ReplayPolicy::Lenient,
        );
        assert_eq!(
            result.unwrap(),
            ReplayReport {
                applied: 2,
                skipped: 1
            }
        );
        assert_eq!(store.get("a"), Some("1".to_string()));
        assert_eq!(store.get("b"), Some("2".to_string()));
    }

    #[test]
    fn test_strict_aborts_on_unsupported() {
        let (store, result) = replay_str(
            "SET a 1\nPUBLISH news hello\nSET b 2\n",
            ReplayPolicy::Strict,
        );
        match result {
            Err(AofError::Replay { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected replay error, got {:?}", other),
        }
        // Records before the bad line were already applied
        assert_eq!(store.get("a"), Some("1".to_string()));
        assert_eq!(store.get("b"), None);
    }

    #[test]
    fn test_lenient_tolerates_torn_last_line() {
        let (store, result) = replay_str("SET a 1\nSET b", ReplayPolicy::Lenient);
        assert_eq!(
            result.unwrap(),
            ReplayReport {
                applied: 1,
                skipped: 1
            }
        );
        assert_eq!(store.get("a"), Some("1".to_string()));
    }

    #[test]
    fn test_blank_lines_ignored() {
        let (_, result) = replay_str("\nSET a 1\n\r\n", ReplayPolicy::Strict);
        assert_eq!(result.unwrap().applied, 1);
    }

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new();
        let report = replay(&dir.path().join("absent.aof"), &store, ReplayPolicy::Strict).unwrap();
        assert_eq!(report, ReplayReport::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_replay_matches_original_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = AofConfig {
            path: dir.path().join("state.aof"),
            ..Default::default()
        };

        let original = Store::new().with_log(Arc::new(AppendLog::open(&config).unwrap()));
        original.set("a".into(), "1".into(), 0).unwrap();
        original.set("b".into(), "2".into(), 0).unwrap();
        original.set("c".into(), "3".into(), 3600).unwrap();
        original.delete("a").unwrap();
        original.delete("missing").unwrap();
        original.set("b".into(), "20".into(), 0).unwrap();
        original.log().unwrap().flush().unwrap();

        let restored = Store::new();
        let report = replay(&config.path, &restored, ReplayPolicy::Strict).unwrap();
        assert_eq!(report.applied, 6);

        for key in ["a", "b", "c", "missing"] {
            assert_eq!(restored.get(key), original.get(key), "key {}", key);
        }
    }

    #[test]
    fn test_replay_does_not_rewrite_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.aof");
        std::fs::write(&path, "SET a 1\nDEL a\n").unwrap();

        let store = Store::new();
        replay(&path, &store, ReplayPolicy::Strict).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "SET a 1\nDEL a\n");
    }
}
