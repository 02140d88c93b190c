//! Connection error types

use std::fmt;

use crate::destination::ConsumerError;
use crate::message::MessageError;

/// Errors surfaced by a connection, on either the outbound or inbound path
#[derive(Debug)]
pub enum ConnectionError {
    /// Wire payload could not be decoded
    MalformedMessage(MessageError),
    /// No destination registered for the channel
    UnknownDestination(String),
    /// A request with this id is already pending
    DuplicateId(String),
    /// A destination with this name is already registered
    DuplicateDestination(String),
    /// Pending request table is full
    TooManyPending(usize),
    /// Network failure or non-success response status
    Transport(String),
    /// Time-to-live elapsed before a reply arrived
    Expired(String),
    /// Local listener could not be bound
    Bind(std::io::Error),
    /// Feature not available on this connection
    NotImplemented(&'static str),
    /// Consumer failed to produce a reply
    Consumer(ConsumerError),
    /// Connection shut down while the request was pending
    Closed,
    /// Reply slot dropped without being resolved
    Abandoned,
}

impl ConnectionError {
    /// Whether a caller may reasonably retry the same operation.
    ///
    /// Nothing is retried inside the connector; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Expired(_) | Self::TooManyPending(_))
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage(e) => write!(f, "{}", e),
            Self::UnknownDestination(channel) => write!(f, "unknown destination: {}", channel),
            Self::DuplicateId(id) => write!(f, "request id already pending: {}", id),
            Self::DuplicateDestination(name) => {
                write!(f, "destination already registered: {}", name)
            }
            Self::TooManyPending(max) => write!(f, "too many pending requests (max {})", max),
            Self::Transport(reason) => write!(f, "transport error: {}", reason),
            Self::Expired(id) => write!(f, "message expired: {}", id),
            Self::Bind(e) => write!(f, "failed to bind listener: {}", e),
            Self::NotImplemented(what) => write!(f, "not implemented: {}", what),
            Self::Consumer(e) => write!(f, "consumer error: {}", e),
            Self::Closed => write!(f, "connection closed"),
            Self::Abandoned => write!(f, "reply slot dropped without a result"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedMessage(e) => Some(e),
            Self::Bind(e) => Some(e),
            Self::Consumer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MessageError> for ConnectionError {
    fn from(e: MessageError) -> Self {
        Self::MalformedMessage(e)
    }
}

impl From<ConsumerError> for ConnectionError {
    fn from(e: ConsumerError) -> Self {
        Self::Consumer(e)
    }
}

impl From<hyper::Error> for ConnectionError {
    fn from(e: hyper::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Result type for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ConnectionError::Transport("refused".into()).is_retryable());
        assert!(ConnectionError::Expired("r1".into()).is_retryable());
        assert!(!ConnectionError::DuplicateId("r1".into()).is_retryable());
        assert!(!ConnectionError::UnknownDestination("q".into()).is_retryable());
        assert!(!ConnectionError::NotImplemented("topics").is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ConnectionError::Expired("r1".into()).to_string(),
            "message expired: r1"
        );
        assert_eq!(
            ConnectionError::Transport("404 Not Found".into()).to_string(),
            "transport error: 404 Not Found"
        );
        let malformed: ConnectionError = MessageError::Malformed("eof".into()).into();
        assert_eq!(malformed.to_string(), "malformed message: eof");
    }
}
