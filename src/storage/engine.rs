//! Keyspace Engine with Expiry Support
//!
//! This module implements the authoritative in-memory keyspace for LedgerKV:
//! a map from key to value with an optional expiry instant, guarded by a
//! single reader/writer lock.
//!
//! ## Design Decisions
//!
//! 1. **One RwLock**: `get` takes the shared lock; `set`, `delete` and
//!    `clean_expired` take the exclusive lock. Log order has to match the
//!    order writers committed in, and one lock gives that order for free.
//! 2. **Lazy Expiry**: Reads treat an expired entry as absent but never remove
//!    it; removal is the sweeper's job.
//! 3. **Log outside the lock**: The append-only log is written after the map
//!    lock is released, using a ticket taken while the lock was still held
//!    (see `aof::writer`).
//!
//! ## Lock Scope
//!
//! ```text
//!  set(k, v)                          get(k)
//!  ─────────                          ──────
//!  write lock ──┐                     read lock ──┐
//!    insert     │ readers wait          lookup    │ writers wait
//!    ticket     │                       expired?  │
//!  unlock ──────┘                     unlock ─────┘
//!  append to log (in ticket order)
//!  return to caller
//! ```

use crate::aof::{AofError, AppendLog, LogRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: String,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry expiring `ttl` after `now`.
    ///
    /// A TTL too large to represent as an `Instant` never expires.
    pub fn with_ttl(value: String, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: now.checked_add(ttl),
        }
    }

    /// An entry is expired from its expiry instant onwards.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Operation counters, all approximate (relaxed ordering).
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Entries physically present, including expired ones not yet swept
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    /// Entries removed by the sweeper
    pub expired: u64,
}

/// The keyspace.
///
/// Construct it empty with [`Store::new`], optionally seed it by replaying a
/// log, then attach the live log with [`Store::with_log`] and share it
/// behind an `Arc`.
///
/// # Example
///
/// ```
/// use ledgerkv::storage::Store;
///
/// let store = Store::new();
///
/// store.set("name".into(), "Ariz".into(), 0).unwrap();
/// assert_eq!(store.get("name"), Some("Ariz".to_string()));
///
/// store.delete("name").unwrap();
/// assert_eq!(store.get("name"), None);
/// ```
pub struct Store {
    entries: RwLock<HashMap<String, Entry>>,

    /// Where mutations are recorded; None while replaying or when disabled
    log: Option<Arc<AppendLog>>,

    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.len())
            .field("log", &self.log.as_ref().map(|log| log.path()))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store with no log attached.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            log: None,
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Attaches the append-only log; every later mutation is recorded in it.
    pub fn with_log(mut self, log: Arc<AppendLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn log(&self) -> Option<&Arc<AppendLog>> {
        self.log.as_ref()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a key, overwriting any previous value and expiry.
    ///
    /// A positive `ttl_seconds` makes the key expire that many seconds from
    /// now; zero or negative means no expiry.
    ///
    /// The in-memory write is applied before the log is touched. An `Err`
    /// means only that the record could not be persisted; the new value is
    /// visible either way.
    pub fn set(&self, key: String, value: String, ttl_seconds: i64) -> Result<(), AofError> {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let entry = if ttl_seconds > 0 {
            Entry::with_ttl(value, Duration::from_secs(ttl_seconds as u64), now)
        } else {
            Entry::new(value)
        };

        let record = self
            .log
            .as_ref()
            .map(|_| LogRecord::set(key.as_str(), entry.value.as_str(), ttl_seconds));

        self.commit(record, |entries| {
            entries.insert(key, entry);
        })
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    /// Like [`Store::get`], judging expiry as of `now`.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let entries = self.read_entries();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value.clone())
    }

    /// Remaining time to live of a key.
    ///
    /// - `None` if the key doesn't exist or has expired
    /// - `Some(None)` if the key exists without expiry
    /// - `Some(Some(remaining))` otherwise
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let now = Instant::now();
        let entries = self.read_entries();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.expires_at.map(|exp| exp.saturating_duration_since(now)))
    }

    /// Deletes a key.
    ///
    /// The deletion is logged whether or not the key existed.
    pub fn delete(&self, key: &str) -> Result<(), AofError> {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let record = self.log.as_ref().map(|_| LogRecord::del(key));

        self.commit(record, |entries| {
            entries.remove(key);
        })
    }

    /// Applies `mutate` under the write lock, then logs `record` in commit
    /// order once the lock is released.
    fn commit<F>(&self, record: Option<LogRecord>, mutate: F) -> Result<(), AofError>
    where
        F: FnOnce(&mut HashMap<String, Entry>),
    {
        let reserved = {
            let mut entries = self.write_entries();
            mutate(&mut entries);
            match (&self.log, record) {
                (Some(log), Some(record)) => Some((log, log.reserve(), record)),
                _ => None,
            }
        };

        match reserved {
            Some((log, ticket, record)) => log.append_reserved(ticket, &record),
            None => Ok(()),
        }
    }

    /// Removes every expired entry.
    ///
    /// This is called by the background expiry sweeper.
    ///
    /// # Returns
    ///
    /// Returns the number of entries removed.
    pub fn clean_expired(&self) -> u64 {
        self.clean_expired_at(Instant::now())
    }

    /// Like [`Store::clean_expired`], judging expiry as of `now`.
    pub fn clean_expired_at(&self, now: Instant) -> u64 {
        let mut entries = self.write_entries();
        let before = entries.len();

        entries.retain(|_, entry| !entry.is_expired_at(now));

        let removed = (before - entries.len()) as u64;
        if removed > 0 {
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Number of entries physically present, including expired entries the
    /// sweeper has not removed yet.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aof::{AofConfig, FsyncPolicy};
    use std::thread;

    fn set(store: &Store, key: &str, value: &str, ttl_seconds: i64) {
        store
            .set(key.to_string(), value.to_string(), ttl_seconds)
            .unwrap();
    }

    #[test]
    fn test_set_and_get() {
        let store = Store::new();
        set(&store, "foo", "bar", 0);
        assert_eq!(store.get("foo"), Some("bar".to_string()));
    }

    #[test]
    fn test_get_nonexistent() {
        let store = Store::new();
        assert_eq!(store.get("nonexistent"), None);
    }

    #[test]
    fn test_overwrite_replaces_value_and_ttl() {
        let store = Store::new();
        set(&store, "key", "old", 10);
        set(&store, "key", "new", 0);

        assert_eq!(store.get("key"), Some("new".to_string()));
        assert_eq!(store.ttl("key"), Some(None));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_empty_value_is_found() {
        let store = Store::new();
        set(&store, "empty", "", 0);
        assert_eq!(store.get("empty"), Some(String::new()));
    }

    #[test]
    fn test_delete() {
        let store = Store::new();
        set(&store, "key", "value", 0);

        store.delete("key").unwrap();
        assert_eq!(store.get("key"), None);

        // Deleting a missing key is fine
        store.delete("key").unwrap();
        assert_eq!(store.get("key"), None);
    }

    #[test]
    fn test_non_positive_ttl_never_expires() {
        let store = Store::new();
        set(&store, "zero", "v", 0);
        set(&store, "negative", "v", -5);

        let far_future = Instant::now() + Duration::from_secs(10 * 365 * 24 * 3600);
        assert_eq!(store.get_at("zero", far_future), Some("v".to_string()));
        assert_eq!(store.get_at("negative", far_future), Some("v".to_string()));
    }

    #[test]
    fn test_lazy_expiry() {
        let store = Store::new();
        set(&store, "session", "token", 5);

        let now = Instant::now();
        assert_eq!(store.get_at("session", now), Some("token".to_string()));
        assert_eq!(store.get_at("session", now + Duration::from_secs(6)), None);

        // Reads never remove anything
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expired_at_exact_instant() {
        let now = Instant::now();
        let entry = Entry::with_ttl("v".to_string(), Duration::from_secs(1), now);
        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let store = Store::new();
        set(&store, "forever", "v", i64::MAX);

        assert_eq!(store.get("forever"), Some("v".to_string()));
        assert_eq!(store.ttl("forever"), Some(None));
    }

    #[test]
    fn test_ttl() {
        let store = Store::new();
        assert_eq!(store.ttl("nonexistent"), None);

        set(&store, "persistent", "value", 0);
        assert_eq!(store.ttl("persistent"), Some(None));

        set(&store, "expiring", "value", 100);
        let remaining = store.ttl("expiring").unwrap().unwrap();
        assert!(remaining > Duration::from_secs(95) && remaining <= Duration::from_secs(100));
    }

    #[test]
    fn test_clean_expired() {
        let store = Store::new();
        set(&store, "key1", "value1", 1);
        set(&store, "key2", "value2", 1);
        set(&store, "key3", "value3", 0);

        assert_eq!(store.clean_expired(), 0);

        let later = Instant::now() + Duration::from_secs(2);
        assert_eq!(store.clean_expired_at(later), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("key3"), Some("value3".to_string()));
        assert_eq!(store.stats().expired, 2);
    }

    #[test]
    fn test_stats() {
        let store = Store::new();
        set(&store, "a", "1", 0);
        store.get("a");
        store.get("b");
        store.delete("a").unwrap();

        let stats = store.stats();
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.set_ops, 1);
        assert_eq!(stats.get_ops, 2);
        assert_eq!(stats.del_ops, 1);
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(Store::new());
        let mut handles = vec![];

        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    store.set(key.clone(), "value".to_string(), 0).unwrap();
                    assert_eq!(store.get(&key), Some("value".to_string()));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1000);
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let store = Arc::new(Store::new());

        let writers: Vec<_> = ["A", "B"]
            .into_iter()
            .map(|value| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        store.set("k".to_string(), value.to_string(), 0).unwrap();
                        let seen = store.get("k").unwrap();
                        assert!(seen == "A" || seen == "B", "torn value {:?}", seen);
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        let last = store.get("k").unwrap();
        assert!(last == "A" || last == "B");
    }

    #[test]
    fn test_mutations_are_logged_in_commit_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = AofConfig {
            path: dir.path().join("store.aof"),
            fsync: FsyncPolicy::Never,
            ..Default::default()
        };
        let store = Arc::new(Store::new().with_log(Arc::new(AppendLog::open(&config).unwrap())));

        let writers: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|value| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        store.set("k".to_string(), value.to_string(), 0).unwrap();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        let contents = std::fs::read_to_string(&config.path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 800);

        // The last logged write is the value readers observe
        let final_value = store.get("k").unwrap();
        assert_eq!(lines.last().copied(), Some(format!("SET k {}", final_value).as_str()));
    }

    #[test]
    fn test_delete_logged_even_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = AofConfig {
            path: dir.path().join("del.aof"),
            ..Default::default()
        };
        let store = Store::new().with_log(Arc::new(AppendLog::open(&config).unwrap()));

        store.delete("ghost").unwrap();
        set(&store, "k", "v", 30);

        let contents = std::fs::read_to_string(&config.path).unwrap();
        assert_eq!(contents, "DEL ghost\nSET k v 30\n");
    }
}
