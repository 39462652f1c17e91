//! Command Handler Module
//!
//! Receives decoded requests, runs them against the keyspace or the pub/sub
//! registry, and produces the reply to send back.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Request Codec  │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Normalize    │
//! │  - Validate     │
//! │  - Execute      │
//! └───┬─────────┬───┘
//!     │         │
//!     ▼         ▼
//!  Store      PubSub
//! ```
//!
//! Validation happens entirely here: a request that fails arity or TTL
//! checks never reaches the store.

pub mod handler;

pub use handler::{CommandError, CommandHandler, Outcome};
