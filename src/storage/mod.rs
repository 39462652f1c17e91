//! Storage Module
//!
//! This module provides the keyspace for LedgerKV: a thread-safe map from
//! key to string value with optional TTL, plus the background sweeper that
//! removes expired entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │        RwLock<HashMap<String, Entry>>  ──>  AppendLog       │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **RwLock**: Multiple concurrent readers, exclusive writers
//! - **TTL Support**: Keys can expire a number of seconds after being set
//! - **Lazy Expiry**: Expired keys read as absent before they are removed
//! - **Active Expiry**: Background sweeper removes expired keys
//! - **Durability Hook**: Mutations are appended to the log in commit order

pub mod engine;
pub mod expiry;

pub use engine::{Entry, StorageStats, Store};
pub use expiry::{ExpiryConfig, ExpirySweeper};
