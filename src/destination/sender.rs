//! Queue sender handle

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::connection::Connection;
use crate::error::Result;
use crate::message::Message;
use crate::pending::PendingReply;

/// Sends requests to one queue over a connection
#[derive(Clone)]
pub struct QueueSender {
    connection: Arc<dyn Connection>,
    queue: String,
    time_to_live: Option<Duration>,
}

impl QueueSender {
    /// Create a sender for `queue`, starting from the connection's default
    /// time-to-live
    pub fn new(connection: Arc<dyn Connection>, queue: impl Into<String>) -> Self {
        let time_to_live = connection.default_time_to_live();
        Self {
            connection,
            queue: queue.into(),
            time_to_live,
        }
    }

    /// Expire every request this sender creates `ttl` after creation.
    /// A zero `ttl` disables expiry.
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl).filter(|ttl| !ttl.is_zero());
        self
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Build the request message for `body`
    pub fn message(&self, body: Value) -> Message {
        match self.time_to_live {
            Some(ttl) => Message::with_time_to_live(self.queue.as_str(), body, ttl),
            None => Message::new(self.queue.as_str(), body),
        }
    }

    /// Send `body` and return the pending reply without waiting for it
    pub fn send(&self, body: Value) -> Result<PendingReply> {
        self.connection.send(self.message(body))
    }

    /// Send `body` and wait for the reply
    pub async fn request(&self, body: Value) -> Result<Message> {
        self.send(body)?.await
    }
}
