//! Connection Handler
//!
//! Each client gets its own task that drives a small state machine:
//!
//! ```text
//!                 ┌───────────────────────────────────────┐
//!                 │                                       │
//!                 ▼                                       │ reply sent
//!  ┌────────────────────────┐  request  ┌──────────────┐  │
//!  │    ReadingCommand      │──────────>│ Dispatching  │──┘
//!  └───────────┬────────────┘           └──────┬───────┘
//!              │ EOF / decode error            │ SUBSCRIBE
//!              │ / shutdown                    ▼
//!              │                        ┌──────────────┐
//!              │                        │  Subscribed  │
//!              │                        └──────┬───────┘
//!              │                               │ EOF / shutdown
//!              ▼                               ▼
//!  ┌──────────────────────────────────────────────────┐
//!  │  Closed: unsubscribe everywhere, release socket  │
//!  └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut` buffer. TCP is a stream
//! protocol, so one read may hold half a request or several requests. The
//! buffer is capped at 64 KiB; a request that does not fit is fatal to the
//! connection.
//!
//! ## Writes
//!
//! The socket's write half lives in a [`ConnectionHandle`] shared with the
//! connection's delivery tasks, so replies and published messages never
//! interleave mid-frame.

use crate::commands::{CommandHandler, Outcome};
use crate::protocol::{parse_request, ParseError, Request, RespValue};
use crate::pubsub::{ConnectionHandle, ConnectionId};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer (64 KiB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

type Writer = BufWriter<OwnedWriteHalf>;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection and returns its id.
    pub fn connection_opened(&self) -> ConnectionId {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.connections_accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug)]
enum State {
    /// Waiting for a complete request
    ReadingCommand,
    /// A request has been decoded and is about to run
    Dispatching(Request),
    /// Only delivery traffic flows; client input is discarded
    Subscribed,
    /// Terminal
    Closed,
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    id: ConnectionId,

    reader: OwnedReadHalf,

    /// Shared with this connection's delivery tasks
    writer: ConnectionHandle<Writer>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Flips to `true` when the server is shutting down
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The TCP stream for this connection
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing commands
    /// * `stats` - Shared connection statistics
    /// * `shutdown` - Server shutdown signal
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let id = stats.connection_opened();
        let (reader, writer) = stream.into_split();

        Self {
            id,
            reader,
            writer: ConnectionHandle::new(id, BufWriter::new(writer)),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
            shutdown,
        }
    }

    /// Runs the connection until it reaches `Closed`.
    ///
    /// Subscriptions are removed on every exit path.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, id = self.id, "Client connected");

        let result = self.drive().await;

        let removed = self.command_handler.pubsub().unsubscribe_all(self.id);
        if removed > 0 {
            debug!(client = %self.addr, subscriptions = removed, "Removed subscriptions");
        }

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn drive(&mut self) -> Result<(), ConnectionError> {
        let mut state = State::ReadingCommand;

        loop {
            trace!(client = %self.addr, state = ?state, "Connection state");
            state = match state {
                State::ReadingCommand => self.read_command().await?,
                State::Dispatching(request) => self.dispatch(request).await?,
                State::Subscribed => self.discard_until_closed().await?,
                State::Closed => return Ok(()),
            };
        }
    }

    /// Reads until one full request is buffered.
    async fn read_command(&mut self) -> Result<State, ConnectionError> {
        loop {
            match self.try_parse_request() {
                Ok(Some(request)) => return Ok(State::Dispatching(request)),
                Ok(None) => {}
                Err(e) => return Err(self.protocol_error(e).await),
            }

            match self.read_more_data().await {
                Ok(true) => {}
                Ok(false) => return Ok(State::Closed),
                Err(e @ (ConnectionError::UnexpectedEof | ConnectionError::BufferFull)) => {
                    return Err(self.protocol_error(e).await);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempts to parse a request from the front of the buffer.
    fn try_parse_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match parse_request(&self.buffer)? {
            Some((request, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(request))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    ///
    /// Returns `Ok(false)` when the client closed cleanly between requests
    /// or the server is shutting down.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = match self.read_or_shutdown().await? {
            Some(n) => n,
            None => return Ok(false),
        };

        if n == 0 {
            if self.buffer.is_empty() {
                return Ok(false);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(true)
    }

    /// One socket read, or `None` once shutdown has been signalled.
    async fn read_or_shutdown(&mut self) -> std::io::Result<Option<usize>> {
        if *self.shutdown.borrow() {
            return Ok(None);
        }

        tokio::select! {
            result = self.reader.read_buf(&mut self.buffer) => result.map(Some),
            _ = self.shutdown.changed() => {
                debug!(client = %self.addr, "Closing connection for shutdown");
                Ok(None)
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<State, ConnectionError> {
        trace!(client = %self.addr, command = %request.name, "Dispatching");
        self.stats.command_processed();

        match self.command_handler.execute(request).await {
            Outcome::Reply(reply) => {
                self.send_response(&reply).await?;
                Ok(State::ReadingCommand)
            }
            Outcome::Subscribe { channel } => {
                self.enter_subscribed(&channel).await?;
                Ok(State::Subscribed)
            }
        }
    }

    /// Confirms and registers the subscription while holding the writer, so
    /// the confirmation is on the wire before any delivered message.
    async fn enter_subscribed(&mut self, channel: &str) -> Result<(), ConnectionError> {
        let bytes = Outcome::subscribed(channel).serialize();
        {
            let mut out = self.writer.lock().await;
            self.command_handler.pubsub().subscribe(channel, &self.writer);
            out.write_all(&bytes).await?;
            out.flush().await?;
        }
        self.stats.bytes_written(bytes.len());

        // Anything pipelined behind SUBSCRIBE is never executed
        self.buffer.clear();

        info!(client = %self.addr, channel, "Entered subscribed mode");
        Ok(())
    }

    /// Subscribed mode: input is read only to notice the peer closing.
    async fn discard_until_closed(&mut self) -> Result<State, ConnectionError> {
        loop {
            match self.read_or_shutdown().await? {
                Some(0) | None => return Ok(State::Closed),
                Some(n) => {
                    trace!(client = %self.addr, bytes = n, "Ignoring input while subscribed");
                    self.buffer.clear();
                }
            }
        }
    }

    /// Logs a decode failure and tells the client before the connection
    /// closes. The client may already be gone, so write errors are ignored.
    async fn protocol_error(&mut self, err: ConnectionError) -> ConnectionError {
        warn!(client = %self.addr, error = %err, "Protocol error, closing connection");
        let reply = RespValue::error(format!("ERR protocol error: {}", err));
        if let Err(e) = self.send_response(&reply).await {
            debug!(client = %self.addr, error = %e, "Could not report protocol error");
        }
        err
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let written = self.writer.write_value(response).await?;
        self.stats.bytes_written(written);
        trace!(client = %self.addr, bytes = written, "Sent response");
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed request
    #[error("{0}")]
    ParseError(#[from] ParseError),

    /// Stream ended in the middle of a request
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("request exceeds the {} byte buffer limit", MAX_BUFFER_SIZE)]
    BufferFull,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, shutdown);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}
