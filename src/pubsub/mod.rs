//! Publish/Subscribe Module
//!
//! Channels are created on first subscription and removed when their last
//! subscriber leaves. Messages are fire-and-forget: `publish` only queues
//! them, and each subscriber's delivery task writes them out.
//!
//! ## Lifecycle
//!
//! ```text
//!  SUBSCRIBE news          PUBLISH news hi          connection closed
//!  ──────────────          ───────────────          ─────────────────
//!  mailbox + task   ──>    queue "hi"        ──>    unsubscribe_all()
//!  registered              task writes $2 hi        task aborted
//! ```

pub mod registry;

pub use registry::{
    ConnectionHandle, ConnectionId, DeliveryPolicy, PubSub, PubSubConfig, DEFAULT_QUEUE_CAPACITY,
};
