//! # LedgerKV - An In-Memory Key-Value Store with an Append-Only Log
//!
//! LedgerKV is a single-node, in-memory key-value store speaking a small
//! RESP-like text protocol. Keys can expire, every write is recorded in a
//! human-readable append-only log that is replayed on startup, and the same
//! connections can be used for simple publish/subscribe messaging.
//!
//! ## Features
//!
//! - **Dual framing**: Multi-bulk (`*N` / `$len`) and plain-line requests
//! - **TTL Support**: Keys can expire with lazy and active expiry
//! - **Durability**: Ordered, line-oriented append-only log with replay
//! - **Pub/Sub**: Per-subscriber bounded mailboxes with configurable backpressure
//! - **Async I/O**: Built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              LedgerKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──┬───────┬──┘                  │
//! │                            │              │       │                     │
//! │                            ▼              ▼       ▼                     │
//! │                     ┌─────────────┐  ┌────────┐ ┌──────────────────┐    │
//! │                     │  Protocol   │  │ PubSub │ │      Store       │    │
//! │                     │  Codec      │  └────────┘ │ RwLock<HashMap>  │    │
//! │                     └─────────────┘             └────┬────────▲────┘    │
//! │                                                      │        │         │
//! │                                                      ▼        │         │
//! │                                            ┌───────────┐  ┌──────────┐  │
//! │                                            │ AppendLog │  │ Sweeper  │  │
//! │                                            └───────────┘  └──────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use ledgerkv::aof::{self, AofConfig, AppendLog};
//! use ledgerkv::commands::CommandHandler;
//! use ledgerkv::connection::{handle_connection, ConnectionStats};
//! use ledgerkv::pubsub::PubSub;
//! use ledgerkv::storage::{ExpiryConfig, ExpirySweeper, Store};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AofConfig::default();
//!
//!     // Rebuild the keyspace, then start logging new writes
//!     let store = Store::new();
//!     aof::replay(&config.path, &store, config.replay)?;
//!     let store = Arc::new(store.with_log(Arc::new(AppendLog::open(&config)?)));
//!
//!     let _sweeper = ExpirySweeper::start(Arc::clone(&store), ExpiryConfig::default());
//!     let handler = CommandHandler::new(store, Arc::new(PubSub::default()));
//!     let stats = Arc::new(ConnectionStats::new());
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(
//!             stream,
//!             addr,
//!             handler.clone(),
//!             Arc::clone(&stats),
//!             shutdown_rx.clone(),
//!         ));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `SET key value [EX seconds]`
//! - `GET key`
//! - `DEL key`
//! - `SUBSCRIBE channel`
//! - `PUBLISH channel message...`
//!
//! A missing key reads as the nil bulk `$-1`. Empty keys and values are
//! rejected because the log cannot record them.
//!
//! ## Module Overview
//!
//! - [`protocol`]: Request decoding and reply encoding
//! - [`storage`]: The keyspace with TTL support and the expiry sweeper
//! - [`aof`]: The append-only log and startup replay
//! - [`pubsub`]: Channel registry and per-subscriber delivery
//! - [`commands`]: Validation and execution of client commands
//! - [`connection`]: The per-connection state machine
//!
//! ## Design Highlights
//!
//! ### Log Order Equals Commit Order
//!
//! A writer takes a ticket from the log while it still holds the keyspace
//! lock, then releases the lock before doing any file I/O. The log writes
//! records strictly in ticket order, so the file always matches the order
//! in which readers could observe the writes.
//!
//! ### Lazy + Active Expiry
//!
//! Keys with TTL are expired in two ways:
//! 1. **Lazy**: Reads treat an expired key as absent
//! 2. **Active**: A background task periodically removes expired keys
//!
//! ### Known Limitation
//!
//! The log format has no escaping: keys or values containing whitespace
//! do not survive a replay intact.

pub mod aof;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod storage;

// Re-export commonly used types for convenience
pub use aof::{AofConfig, AofError, AppendLog, FsyncPolicy, ReplayPolicy, ReplayReport};
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{parse_request, ParseError, Request, RespValue};
pub use pubsub::{DeliveryPolicy, PubSub, PubSubConfig};
pub use storage::{ExpiryConfig, ExpirySweeper, Store};

/// The default port LedgerKV listens on
pub const DEFAULT_PORT: u16 = 6379;

/// The default host LedgerKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of LedgerKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
