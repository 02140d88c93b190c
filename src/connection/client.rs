//! Outbound request transmission

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use super::read_body;
use crate::config::BrokerConfig;
use crate::error::{ConnectionError, Result};
use crate::message::Message;

/// POST one serialized message to the broker and decode the reply body.
///
/// Any failure before a well-formed reply is decoded surfaces as
/// `ConnectionError::Transport`.
pub(super) async fn transmit(
    broker: &BrokerConfig,
    max_body_size: usize,
    body: String,
) -> Result<Message> {
    let authority = broker.authority();

    let stream = tokio::time::timeout(broker.connect_timeout, TcpStream::connect(&authority))
        .await
        .map_err(|_| {
            ConnectionError::Transport(format!(
                "connect to {} timed out after {:?}",
                authority, broker.connect_timeout
            ))
        })?
        .map_err(|e| ConnectionError::Transport(format!("connect to {}: {}", authority, e)))?;
    let _ = stream.set_nodelay(true);

    let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!("Client connection closed with error: {:?}", err);
        }
    });

    let request = Request::builder()
        .method(Method::POST)
        .uri(broker.path.as_str())
        .header(HOST, authority.as_str())
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| ConnectionError::Transport(format!("invalid request: {}", e)))?;

    let response = sender.send_request(request).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ConnectionError::Transport(status.to_string()));
    }

    let bytes = read_body(response.into_body(), max_body_size)
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;

    Message::from_json(&bytes)
        .map_err(|e| ConnectionError::Transport(format!("invalid reply from {}: {}", authority, e)))
}
