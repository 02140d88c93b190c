//! Courier - request/reply message transport over HTTP
//!
//! Carries messages addressed to named queues across an HTTP link and
//! correlates each request with its asynchronous reply, enforcing optional
//! per-message expiration.

pub mod config;
pub mod connection;
pub mod destination;
pub mod error;
pub mod message;
pub mod metrics;
pub mod pending;

pub use config::Config;
pub use connection::{Connection, HttpConnection};
pub use destination::{
    Consumer, ConsumerError, Destination, DestinationKind, DestinationRegistry, EchoConsumer,
    QueueSender,
};
pub use error::ConnectionError;
pub use message::{Message, MessageError, MessageHeader};
pub use metrics::{Metrics, MetricsServer};
pub use pending::{PendingReply, PendingRequestTable, ReplySlot};
