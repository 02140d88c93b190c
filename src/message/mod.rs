//! Message Envelope
//!
//! A message is an immutable header plus an opaque JSON body. Headers carry
//! the identity and routing metadata used to correlate replies with the
//! requests they answer.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Errors produced while decoding a wire message
#[derive(Debug)]
pub enum MessageError {
    /// Payload is not a well-formed message document
    Malformed(String),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::Malformed(msg) => write!(f, "malformed message: {}", msg),
        }
    }
}

impl std::error::Error for MessageError {}

impl From<serde_json::Error> for MessageError {
    fn from(e: serde_json::Error) -> Self {
        MessageError::Malformed(e.to_string())
    }
}

/// Current wall-clock time in epoch milliseconds.
///
/// Expirations are absolute deadlines set by the sender, so they are always
/// compared against wall-clock time rather than a monotonic clock.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identity and routing metadata attached to every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Unique message id
    pub id: String,
    /// Queue or topic name
    pub channel: String,
    /// Absolute deadline in epoch milliseconds, 0 if the message never expires
    pub expiration: u64,
    /// Id of the request this message replies to, empty for requests
    #[serde(rename = "correlationID")]
    pub correlation_id: String,
}

impl MessageHeader {
    pub fn new(
        id: impl Into<String>,
        channel: impl Into<String>,
        expiration: u64,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel: channel.into(),
            expiration,
            correlation_id: correlation_id.into(),
        }
    }

    /// Whether this message has a deadline at all
    pub fn expires(&self) -> bool {
        self.expiration > 0
    }

    /// Whether the deadline has passed at `now_ms`
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires() && now_ms >= self.expiration
    }

    /// Remaining time before expiry, `None` if the message never expires.
    /// Saturates at zero once the deadline has passed.
    pub fn time_to_live(&self, now_ms: u64) -> Option<Duration> {
        if !self.expires() {
            return None;
        }
        Some(Duration::from_millis(self.expiration.saturating_sub(now_ms)))
    }

    /// Whether this header belongs to a reply rather than an original request
    pub fn is_reply(&self) -> bool {
        !self.correlation_id.is_empty()
    }
}

/// A header plus an opaque body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub body: Value,
}

impl Message {
    /// Create a request with a fresh id and no expiry
    pub fn new(channel: impl Into<String>, body: Value) -> Self {
        Self::from_parts(
            MessageHeader::new(Uuid::new_v4().to_string(), channel, 0, ""),
            body,
        )
    }

    /// Create a request that expires `ttl` from now
    pub fn with_time_to_live(channel: impl Into<String>, body: Value, ttl: Duration) -> Self {
        let expiration = now_millis().saturating_add(ttl.as_millis() as u64);
        Self::from_parts(
            MessageHeader::new(Uuid::new_v4().to_string(), channel, expiration, ""),
            body,
        )
    }

    /// Create a reply to `request`, correlated by the request's id
    pub fn reply(request: &Message, body: Value) -> Self {
        Self::from_parts(
            MessageHeader::new(
                Uuid::new_v4().to_string(),
                request.header.channel.clone(),
                0,
                request.header.id.clone(),
            ),
            body,
        )
    }

    pub fn from_parts(header: MessageHeader, body: Value) -> Self {
        Self { header, body }
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn channel(&self) -> &str {
        &self.header.channel
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> String {
        // A struct of strings, an integer and a `Value` always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode from raw transport bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl FromStr for Message {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(s.as_bytes())
    }
}
