//! Command Handler
//!
//! Validates decoded requests and runs them against the keyspace and the
//! pub/sub registry.
//!
//! ## Supported Commands
//!
//! - `PING` - Test connection
//! - `SET key value [EX seconds]` - Set a key, optionally with a TTL
//! - `GET key` - Get a key's value
//! - `DEL key` - Delete a key
//! - `SUBSCRIBE channel` - Switch the connection to receiving messages
//! - `PUBLISH channel message...` - Send a message to a channel's subscribers
//!
//! Arity counts the command name, so `GET key` has arity 2.
//!
//! `SUBSCRIBE` needs the connection's write half, which this layer never
//! sees, so it comes back as [`Outcome::Subscribe`] for the connection to
//! finish.

use crate::aof::AofError;
use crate::protocol::{Request, RespValue};
use crate::pubsub::PubSub;
use crate::storage::Store;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Errors reported to the client. The connection stays open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR value is not an integer or out of range")]
    InvalidTtl,

    #[error("ERR syntax error")]
    SyntaxError,

    /// The log has no way to record an empty key or value
    #[error("ERR empty {0} is not allowed")]
    EmptyArgument(&'static str),
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(err.to_string())
    }
}

/// What the connection should do after a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send this reply and read the next command
    Reply(RespValue),
    /// Confirm, register the connection on `channel` and stop reading commands
    Subscribe { channel: String },
}

impl Outcome {
    /// The confirmation sent before a connection enters subscribed mode.
    pub fn subscribed(channel: &str) -> RespValue {
        RespValue::status(format!("Subscribed to {}", channel))
    }
}

impl From<CommandError> for Outcome {
    fn from(err: CommandError) -> Self {
        Outcome::Reply(err.into())
    }
}

/// Dispatches requests to the keyspace and the pub/sub registry.
#[derive(Clone, Debug)]
pub struct CommandHandler {
    store: Arc<Store>,
    pubsub: Arc<PubSub>,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>, pubsub: Arc<PubSub>) -> Self {
        Self { store, pubsub }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    /// Executes one request.
    ///
    /// Only `PUBLISH` ever waits, and only when a subscriber's mailbox is
    /// full under the blocking delivery policy.
    pub async fn execute(&self, request: Request) -> Outcome {
        let name = request.name.to_uppercase();

        let result = match name.as_str() {
            "PING" => Ok(RespValue::pong()),
            "SET" => self.cmd_set(request.args),
            "GET" => self.cmd_get(&request.args),
            "DEL" => self.cmd_del(&request.args),
            "SUBSCRIBE" => return self.cmd_subscribe(request.args),
            "PUBLISH" => self.cmd_publish(&request.args).await,
            _ => Err(CommandError::UnknownCommand(request.name)),
        };

        match result {
            Ok(reply) => Outcome::Reply(reply),
            Err(err) => err.into(),
        }
    }

    /// SET key value [EX seconds]
    fn cmd_set(&self, args: Vec<String>) -> Result<RespValue, CommandError> {
        let ttl_seconds = match args.as_slice() {
            [_, _] => 0,
            [_, _, option, ttl] => {
                if !option.eq_ignore_ascii_case("EX") {
                    return Err(CommandError::SyntaxError);
                }
                ttl.parse::<i64>().map_err(|_| CommandError::InvalidTtl)?
            }
            _ => return Err(CommandError::WrongArity("SET")),
        };

        let mut args = args.into_iter();
        let (Some(key), Some(value)) = (args.next(), args.next()) else {
            return Err(CommandError::WrongArity("SET"));
        };
        if key.is_empty() {
            return Err(CommandError::EmptyArgument("key"));
        }
        if value.is_empty() {
            return Err(CommandError::EmptyArgument("value"));
        }

        Ok(persisted(self.store.set(key, value, ttl_seconds)))
    }

    /// GET key
    fn cmd_get(&self, args: &[String]) -> Result<RespValue, CommandError> {
        let [key] = args else {
            return Err(CommandError::WrongArity("GET"));
        };

        Ok(match self.store.get(key) {
            Some(value) => RespValue::bulk(value),
            None => RespValue::null(),
        })
    }

    /// DEL key
    fn cmd_del(&self, args: &[String]) -> Result<RespValue, CommandError> {
        let [key] = args else {
            return Err(CommandError::WrongArity("DEL"));
        };
        if key.is_empty() {
            return Err(CommandError::EmptyArgument("key"));
        }

        Ok(persisted(self.store.delete(key)))
    }

    /// SUBSCRIBE channel
    fn cmd_subscribe(&self, mut args: Vec<String>) -> Outcome {
        match args.pop() {
            Some(channel) if args.is_empty() => Outcome::Subscribe { channel },
            _ => CommandError::WrongArity("SUBSCRIBE").into(),
        }
    }

    /// PUBLISH channel message [message ...]
    async fn cmd_publish(&self, args: &[String]) -> Result<RespValue, CommandError> {
        let [channel, words @ ..] = args else {
            return Err(CommandError::WrongArity("PUBLISH"));
        };
        if words.is_empty() {
            return Err(CommandError::WrongArity("PUBLISH"));
        }

        self.pubsub.publish(channel, &words.join(" ")).await;
        Ok(RespValue::status("Message published"))
    }
}

/// Maps a keyspace write to its reply. The write itself has already been
/// applied even when the log append failed.
fn persisted(result: Result<(), AofError>) -> RespValue {
    match result {
        Ok(()) => RespValue::ok(),
        Err(e) => {
            error!(error = %e, "Failed to append to the log");
            RespValue::error(format!(
                "ERR write applied in memory but not persisted: {}",
                e
            ))
        }
    }
}
