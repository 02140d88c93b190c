//! Connection
//!
//! A connection carries messages to named destinations on a remote peer and
//! correlates each outbound request with the reply that comes back. It also
//! accepts inbound requests, routes them to locally registered consumers and
//! writes the consumer's reply back.
//!
//! `HttpConnection` is the HTTP/1.1 implementation: each request is a POST
//! whose body is one serialized message, and the response body is the reply.

mod client;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BrokerConfig, LimitsConfig};
use crate::destination::{Consumer, Destination, DestinationRegistry};
use crate::error::{ConnectionError, Result};
use crate::message::{now_millis, Message};
use crate::metrics::Metrics;
use crate::pending::{PendingReply, PendingRequestTable};


/// Transport-independent connection interface
#[async_trait]
pub trait Connection: Send + Sync {
    /// Transmit `message` and return a future of its reply.
    ///
    /// Returns immediately; the reply future resolves when the reply arrives
    /// and rejects on transport failure or when the message's expiration
    /// passes first. Must be called from within a Tokio runtime.
    ///
    /// Expiration is the only cancellation path. A message with
    /// `expiration == 0` sent to a peer that accepts the socket but never
    /// answers stays pending until the connection shuts down.
    fn send(&self, message: Message) -> Result<PendingReply>;

    /// Start accepting inbound requests on `addr`, returning the bound address
    async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr>;

    /// Register a queue whose requests are handled by `consumer`
    fn create_queue(&self, name: &str, consumer: Arc<dyn Consumer>) -> Result<Destination> {
        self.registry().add_queue(name, consumer)
    }

    /// Topics have no protocol yet
    fn create_topic(&self, _name: &str) -> Result<Destination> {
        Err(ConnectionError::NotImplemented("topics"))
    }

    /// Destinations served by this connection
    fn registry(&self) -> &DestinationRegistry;

    /// Time-to-live queue senders apply to the requests they build
    fn default_time_to_live(&self) -> Option<Duration> {
        None
    }
}

/// Connection over HTTP/1.1
#[derive(Clone)]
pub struct HttpConnection {
    inner: Arc<Inner>,
}

struct Inner {
    broker: BrokerConfig,
    max_body_size: usize,
    default_time_to_live: Option<Duration>,
    pending: PendingRequestTable,
    registry: DestinationRegistry,
    metrics: Option<Arc<Metrics>>,
    shutdown_tx: broadcast::Sender<()>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpConnection {
    /// Create a connection that sends requests to `broker`
    pub fn new(broker: BrokerConfig, limits: &LimitsConfig) -> Self {
        Self::build(broker, limits, None)
    }

    /// Create a connection that records traffic in `metrics`
    pub fn with_metrics(broker: BrokerConfig, limits: &LimitsConfig, metrics: Arc<Metrics>) -> Self {
        Self::build(broker, limits, Some(metrics))
    }

    fn build(broker: BrokerConfig, limits: &LimitsConfig, metrics: Option<Arc<Metrics>>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                broker,
                max_body_size: limits.max_body_size,
                default_time_to_live: Some(limits.default_time_to_live)
                    .filter(|ttl| !ttl.is_zero()),
                pending: PendingRequestTable::new(limits.max_pending),
                registry: DestinationRegistry::new(),
                metrics,
                shutdown_tx,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Remote endpoint requests are sent to
    pub fn broker(&self) -> &BrokerConfig {
        &self.inner.broker
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether a request with `id` is awaiting a reply
    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.pending.contains(id)
    }

    /// Handle one raw inbound request and return the serialized reply.
    ///
    /// This is the transport-independent half of the inbound path.
    pub async fn on_request(&self, raw: &[u8]) -> Result<String> {
        self.inner.dispatch(raw).await.map(|reply| reply.to_json())
    }

    /// Receiver that fires when `shutdown` is called
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Stop all listeners and reject every pending request with `Closed`
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(());
        for handle in self.inner.listeners.lock().drain(..) {
            handle.abort();
        }

        let rejected = self.inner.pending.reject_all(|| ConnectionError::Closed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.requests_pending.sub(rejected as i64);
        }
        info!("HttpConnection shut down ({} pending requests rejected)", rejected);
    }
}

#[async_trait]
impl Connection for HttpConnection {
    fn send(&self, message: Message) -> Result<PendingReply> {
        let id = message.header.id.clone();
        let reply = self.inner.pending.register(&id)?;
        if let Some(metrics) = &self.inner.metrics {
            metrics.request_registered();
        }

        let timer = message
            .header
            .time_to_live(now_millis())
            .map(|ttl| self.inner.clone().spawn_expiry(id.clone(), ttl));

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let body = message.to_json();
            let started = Instant::now();
            debug!(
                "Sending '{}' to {} ({} bytes)",
                id,
                inner.broker.authority(),
                body.len()
            );
            if let Some(metrics) = &inner.metrics {
                metrics.request_sent(body.len());
            }

            let outcome = client::transmit(&inner.broker, inner.max_body_size, body).await;

            // Clear the timer before settling; a timer that already fired
            // finds the entry gone or takes it first.
            if let Some(timer) = timer {
                timer.abort();
            }
            inner.settle(&id, outcome, started);
        });

        Ok(reply)
    }

    async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(ConnectionError::Bind)?;
        let local_addr = listener.local_addr().map_err(ConnectionError::Bind)?;
        info!("HttpConnection listening on {}", local_addr);

        let inner = self.inner.clone();
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(server::accept_loop(listener, inner, shutdown_rx));
        self.inner.listeners.lock().push(handle);

        Ok(local_addr)
    }

    fn registry(&self) -> &DestinationRegistry {
        &self.inner.registry
    }

    fn default_time_to_live(&self) -> Option<Duration> {
        self.inner.default_time_to_live
    }
}

impl Inner {
    /// Reject `id` with `Expired` once `ttl` elapses, unless it settled first
    fn spawn_expiry(self: Arc<Self>, id: String, ttl: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if self.pending.reject(&id, ConnectionError::Expired(id.clone())) {
                debug!("Request '{}' expired after {:?}", id, ttl);
                if let Some(metrics) = &self.metrics {
                    metrics.request_expired();
                }
            }
        })
    }

    /// Resolve or reject the slot for `id` with the transport outcome.
    /// A no-op when the entry already expired.
    fn settle(&self, id: &str, outcome: Result<Message>, started: Instant) {
        let outcome = outcome.and_then(|reply| {
            if reply.header.is_reply() && reply.header.correlation_id != id {
                Err(ConnectionError::Transport(format!(
                    "reply correlates to '{}', expected '{}'",
                    reply.header.correlation_id, id
                )))
            } else {
                Ok(reply)
            }
        });

        let Some(slot) = self.pending.take(id) else {
            debug!("Discarding late outcome for '{}'", id);
            return;
        };

        match outcome {
            Ok(reply) => {
                debug!("Reply for '{}' received in {:?}", id, started.elapsed());
                if let Some(metrics) = &self.metrics {
                    metrics.reply_received(started.elapsed().as_secs_f64());
                }
                slot.resolve(reply);
            }
            Err(e) => {
                warn!("Request '{}' failed: {}", id, e);
                if let Some(metrics) = &self.metrics {
                    metrics.request_failed();
                }
                slot.reject(e);
            }
        }
    }

    /// Decode an inbound request, route it to its consumer and return the reply
    async fn dispatch(&self, raw: &[u8]) -> Result<Message> {
        let request = Message::from_json(raw)?;
        let destination = self.registry.resolve(request.channel())?;
        debug!(
            "Delivering '{}' to {} '{}'",
            request.id(),
            destination.kind(),
            destination.name()
        );

        let started = Instant::now();
        let reply = destination.consumer().on_message(request).await?;
        if let Some(metrics) = &self.metrics {
            metrics.inbound_handled(started.elapsed().as_secs_f64());
        }
        Ok(reply)
    }
}

/// Failure reading a request or response body
#[derive(Debug)]
enum BodyError {
    TooLarge(usize),
    Read(String),
}

impl std::fmt::Display for BodyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodyError::TooLarge(limit) => write!(f, "body exceeds {} bytes", limit),
            BodyError::Read(e) => write!(f, "failed to read body: {}", e),
        }
    }
}

/// Accumulate a complete body, failing once it grows past `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> std::result::Result<Bytes, BodyError>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(BodyError::TooLarge(limit)),
        Err(e) => Err(BodyError::Read(e.to_string())),
    }
}
