//! Channel Registry and Delivery Tasks
//!
//! Each (channel, connection) subscription owns a bounded mailbox and a
//! Tokio task that drains it, writing every message to the connection as a
//! bulk payload:
//!
//! ```text
//!  publish("news", m)
//!        │
//!        ├──> [mailbox conn 1] ──> delivery task ──> socket 1
//!        ├──> [mailbox conn 2] ──> delivery task ──> socket 2
//!        └──> [mailbox conn 5] ──> delivery task ──> socket 5
//! ```
//!
//! With [`DeliveryPolicy::Block`] a full mailbox makes the publisher wait,
//! so one slow subscriber holds up every publisher on its channel.
//! [`DeliveryPolicy::DropOnFull`] drops the message for that subscriber
//! instead and lets the publisher carry on.

use crate::protocol::RespValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Identifies one client connection.
pub type ConnectionId = u64;

/// Default mailbox capacity per subscriber
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// What `publish` does when a subscriber's mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Wait until the subscriber has room
    #[default]
    Block,
    /// Drop the message for that subscriber
    DropOnFull,
}

/// Configuration for the pub/sub registry.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// Pending messages per subscriber before the delivery policy kicks in
    pub queue_capacity: usize,
    pub delivery: DeliveryPolicy,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery: DeliveryPolicy::default(),
        }
    }
}

/// The write side of a client connection, shared between the connection's
/// own reply path and its delivery tasks.
pub struct ConnectionHandle<W> {
    id: ConnectionId,
    writer: Arc<tokio::sync::Mutex<W>>,
}

impl<W> Clone for ConnectionHandle<W> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W> ConnectionHandle<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(id: ConnectionId, writer: W) -> Self {
        Self {
            id,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Locks the writer. Deliveries to this connection wait until the guard
    /// is dropped.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, W> {
        self.writer.lock().await
    }

    /// Writes one reply and flushes it.
    ///
    /// Returns the number of bytes written.
    pub async fn write_value(&self, value: &RespValue) -> std::io::Result<usize> {
        let bytes = value.serialize();
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(bytes.len())
    }
}

struct Subscriber {
    connection: ConnectionId,
    mailbox: mpsc::Sender<String>,
    delivery: JoinHandle<()>,
}

/// Channel name to subscribers, in subscription order.
pub struct PubSub {
    channels: Mutex<HashMap<String, Vec<Subscriber>>>,
    config: PubSubConfig,
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("channels", &self.channel_count())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new(PubSubConfig::default())
    }
}

impl PubSub {
    pub fn new(config: PubSubConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscriber>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes a connection to a channel.
    ///
    /// Starts a delivery task for the pair. Subscribing the same connection
    /// to the same channel again does nothing and returns `false`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<W>(&self, channel: &str, handle: &ConnectionHandle<W>) -> bool
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut channels = self.lock();
        let subscribers = channels.entry(channel.to_string()).or_default();

        if subscribers.iter().any(|s| s.connection == handle.id()) {
            return false;
        }

        let (mailbox, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let delivery = tokio::spawn(deliver(channel.to_string(), handle.clone(), rx));

        subscribers.push(Subscriber {
            connection: handle.id(),
            mailbox,
            delivery,
        });

        debug!(channel, connection = handle.id(), "Subscribed");
        true
    }

    /// Queues `message` for every current subscriber of `channel`.
    ///
    /// Returns how many subscribers the message was queued for. Delivery to
    /// the socket happens later, on each subscriber's own task.
    pub async fn publish(&self, channel: &str, message: &str) -> usize {
        // The registry lock is not held across the sends below.
        let mailboxes: Vec<mpsc::Sender<String>> = match self.lock().get(channel) {
            Some(subscribers) => subscribers.iter().map(|s| s.mailbox.clone()).collect(),
            None => return 0,
        };

        let mut queued = 0;
        let mut saw_closed = false;

        for mailbox in mailboxes {
            match self.config.delivery {
                DeliveryPolicy::Block => match mailbox.send(message.to_string()).await {
                    Ok(()) => queued += 1,
                    Err(_) => saw_closed = true,
                },
                DeliveryPolicy::DropOnFull => match mailbox.try_send(message.to_string()) {
                    Ok(()) => queued += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(channel, "Subscriber mailbox full, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                },
            }
        }

        if saw_closed {
            self.prune_closed(channel);
        }

        trace!(channel, queued, "Published");
        queued
    }

    /// Drops subscribers whose delivery task has ended.
    fn prune_closed(&self, channel: &str) {
        let mut channels = self.lock();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|s| !s.mailbox.is_closed());
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Removes a connection from every channel and stops its delivery tasks.
    ///
    /// Returns how many subscriptions were removed.
    pub fn unsubscribe_all(&self, connection: ConnectionId) -> usize {
        let mut channels = self.lock();
        let mut removed = 0;

        channels.retain(|channel, subscribers| {
            subscribers.retain(|s| {
                if s.connection == connection {
                    s.delivery.abort();
                    removed += 1;
                    debug!(channel = %channel, connection, "Unsubscribed");
                    false
                } else {
                    true
                }
            });
            !subscribers.is_empty()
        });

        removed
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().get(channel).map(Vec::len).unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }
}

/// Drains one subscriber's mailbox into its connection.
async fn deliver<W>(channel: String, handle: ConnectionHandle<W>, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = handle.write_value(&RespValue::bulk(message)).await {
            debug!(
                channel = %channel,
                connection = handle.id(),
                error = %e,
                "Delivery failed, stopping"
            );
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio_test::{assert_pending, assert_ready};

    fn subscriber(id: ConnectionId) -> (DuplexStream, ConnectionHandle<DuplexStream>) {
        let (client, server) = tokio::io::duplex(1024);
        (client, ConnectionHandle::new(id, server))
    }

    async fn read_frame(client: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for delivery")
            .unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_once() {
        let pubsub = PubSub::default();
        let (mut c1, h1) = subscriber(1);
        let (mut c2, h2) = subscriber(2);
        let (mut other, h3) = subscriber(3);

        assert!(pubsub.subscribe("news", &h1));
        assert!(pubsub.subscribe("news", &h2));
        assert!(pubsub.subscribe("sports", &h3));

        assert_eq!(pubsub.publish("news", "hello").await, 2);

        read_frame(&mut c1, b"$5\r\nhello\r\n").await;
        read_frame(&mut c2, b"$5\r\nhello\r\n").await;

        // Nothing extra for the news subscribers, nothing at all for sports
        let mut buf = [0u8; 1];
        for client in [&mut c1, &mut c2, &mut other] {
            let read = tokio::time::timeout(Duration::from_millis(50), client.read(&mut buf)).await;
            assert!(read.is_err(), "unexpected data");
        }
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let pubsub = PubSub::default();
        let (mut client, handle) = subscriber(7);

        assert!(pubsub.subscribe("news", &handle));
        assert!(!pubsub.subscribe("news", &handle));
        assert_eq!(pubsub.subscriber_count("news"), 1);

        assert_eq!(pubsub.publish("news", "once").await, 1);
        read_frame(&mut client, b"$4\r\nonce\r\n").await;
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let pubsub = PubSub::default();
        assert_eq!(pubsub.publish("nobody", "hello").await, 0);
    }

    #[tokio::test]
    async fn test_messages_delivered_in_order() {
        let pubsub = PubSub::default();
        let (mut client, handle) = subscriber(1);
        pubsub.subscribe("news", &handle);

        for msg in ["one", "two", "three"] {
            pubsub.publish("news", msg).await;
        }

        read_frame(&mut client, b"$3\r\none\r\n$3\r\ntwo\r\n$5\r\nthree\r\n").await;
    }

    #[tokio::test]
    async fn test_unsubscribe_all_removes_connection_everywhere() {
        let pubsub = PubSub::default();
        let (_c1, h1) = subscriber(1);
        let (_c2, h2) = subscriber(2);

        pubsub.subscribe("news", &h1);
        pubsub.subscribe("sports", &h1);
        pubsub.subscribe("news", &h2);

        assert_eq!(pubsub.unsubscribe_all(1), 2);
        assert_eq!(pubsub.subscriber_count("news"), 1);
        assert_eq!(pubsub.subscriber_count("sports"), 0);
        assert_eq!(pubsub.channel_count(), 1);

        assert_eq!(pubsub.publish("news", "hi").await, 1);
        assert_eq!(pubsub.unsubscribe_all(1), 0);
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_pruned() {
        let pubsub = PubSub::default();
        let (client, handle) = subscriber(1);
        pubsub.subscribe("news", &handle);

        // Reader gone: the delivery task's write fails and it exits
        drop(client);
        pubsub.publish("news", "first").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(pubsub.publish("news", "second").await, 0);
        assert_eq!(pubsub.subscriber_count("news"), 0);
    }

    /// A subscriber that never reads: its socket buffer fills, the delivery
    /// task stalls on the write, and the mailbox fills behind it.
    fn stalled_subscriber(pubsub: &PubSub) -> DuplexStream {
        let (client, server) = tokio::io::duplex(4);
        pubsub.subscribe("news", &ConnectionHandle::new(1, server));
        client
    }

    fn single_slot(delivery: DeliveryPolicy) -> PubSub {
        PubSub::new(PubSubConfig {
            queue_capacity: 1,
            delivery,
        })
    }

    #[tokio::test]
    async fn test_block_policy_stalls_publisher() {
        let pubsub = single_slot(DeliveryPolicy::Block);
        let _client = stalled_subscriber(&pubsub);

        // Taken by the delivery task, which then blocks on the socket
        assert_eq!(pubsub.publish("news", "first").await, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Sits in the single mailbox slot
        assert_eq!(pubsub.publish("news", "second").await, 1);

        let mut third = tokio_test::task::spawn(pubsub.publish("news", "third"));
        assert_pending!(third.poll());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_pending!(third.poll());
    }

    #[tokio::test]
    async fn test_drop_policy_never_blocks() {
        let pubsub = single_slot(DeliveryPolicy::DropOnFull);
        let _client = stalled_subscriber(&pubsub);

        assert_eq!(pubsub.publish("news", "first").await, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pubsub.publish("news", "second").await, 1);

        let mut third = tokio_test::task::spawn(pubsub.publish("news", "third"));
        assert_eq!(assert_ready!(third.poll()), 0);
    }
}
