//! Connection Handler Module
//!
//! This module manages individual client connections to LedgerKV.
//! Each client connection is handled by its own async task, allowing
//! the server to handle thousands of concurrent clients efficiently.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Decode      │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               │             │
//! │                           ┌───────────────────┴──────┐      │
//! │                           ▼                          ▼      │
//! │                    ┌─────────────┐         ┌──────────────┐ │
//! │                    │ Send reply  │         │  Subscribed  │ │
//! │                    └─────────────┘         └──────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Dual framing**: Multi-bulk and plain-line requests on one stream
//! - **Pipelining**: Requests queued in one packet are answered in order
//! - **Graceful shutdown**: Connections close when the server signals
//! - **Statistics**: Tracks connection and command metrics
//!
//! ## Example
//!
//! ```ignore
//! use ledgerkv::commands::CommandHandler;
//! use ledgerkv::connection::{handle_connection, ConnectionStats};
//! use ledgerkv::pubsub::PubSub;
//! use ledgerkv::storage::Store;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! let handler = CommandHandler::new(Arc::new(Store::new()), Arc::new(PubSub::default()));
//! let stats = Arc::new(ConnectionStats::new());
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone(), stats.clone(), shutdown_rx.clone()));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
