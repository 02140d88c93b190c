//! Destinations and Consumers
//!
//! A destination is a named queue (or, eventually, topic) with a consumer
//! attached. Inbound requests are routed by channel name through the
//! registry to the destination's consumer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{ConnectionError, Result};
use crate::message::Message;

mod sender;

pub use sender::QueueSender;


/// Failure reported by a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerError {
    reason: String,
}

impl ConsumerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for ConsumerError {}

/// Handler invoked for every message delivered to a destination
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Handle a request and produce its reply
    async fn on_message(&self, message: Message) -> std::result::Result<Message, ConsumerError>;
}

/// Consumer that replies with the request body unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoConsumer;

#[async_trait]
impl Consumer for EchoConsumer {
    async fn on_message(&self, message: Message) -> std::result::Result<Message, ConsumerError> {
        debug!(id = %message.id(), channel = %message.channel(), "echoing message");
        Ok(Message::reply(&message, message.body.clone()))
    }
}

/// Kind of destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    /// Point-to-point queue
    Queue,
    /// Publish/subscribe topic.
    ///
    /// Reserved: no registry path creates one yet, since
    /// `Connection::create_topic` fails with `NotImplemented`. Matches on
    /// this enum should still handle it.
    Topic,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Queue => write!(f, "queue"),
            DestinationKind::Topic => write!(f, "topic"),
        }
    }
}

/// A named endpoint with its consumer
#[derive(Clone)]
pub struct Destination {
    name: String,
    kind: DestinationKind,
    consumer: Arc<dyn Consumer>,
}

impl Destination {
    pub fn new(name: impl Into<String>, kind: DestinationKind, consumer: Arc<dyn Consumer>) -> Self {
        Self {
            name: name.into(),
            kind,
            consumer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn consumer(&self) -> Arc<dyn Consumer> {
        self.consumer.clone()
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Channel name to destination lookup
#[derive(Default)]
pub struct DestinationRegistry {
    destinations: RwLock<HashMap<String, Destination>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue. Fails if the name is already taken.
    pub fn add_queue(&self, name: &str, consumer: Arc<dyn Consumer>) -> Result<Destination> {
        let mut destinations = self.destinations.write();
        if destinations.contains_key(name) {
            return Err(ConnectionError::DuplicateDestination(name.to_string()));
        }

        let destination = Destination::new(name, DestinationKind::Queue, consumer);
        destinations.insert(name.to_string(), destination.clone());
        info!("Registered queue '{}'", name);
        Ok(destination)
    }

    /// Look up the destination for a channel
    pub fn resolve(&self, channel: &str) -> Result<Destination> {
        self.destinations
            .read()
            .get(channel)
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownDestination(channel.to_string()))
    }

    /// Unregister a destination, returning it if it existed
    pub fn remove(&self, name: &str) -> Option<Destination> {
        self.destinations.write().remove(name)
    }

    /// Names of all registered destinations, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.destinations.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.destinations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.read().is_empty()
    }
}
