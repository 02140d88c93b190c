//! Inbound request listener

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{read_body, BodyError, Inner};
use crate::error::ConnectionError;

/// Accept sockets until shutdown, serving each on its own task
pub(super) async fn accept_loop(
    listener: TcpListener,
    inner: Arc<Inner>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                debug!("Accepted connection from {}", peer);

                let io = TokioIo::new(stream);
                let inner = inner.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let inner = inner.clone();
                        async move { handle_request(req, inner).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", peer, err);
                    }
                });
            }
            _ = shutdown_rx.recv() => {
                info!("Listener stopped");
                return;
            }
        }
    }
}

fn respond(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Status and metrics label for an inbound failure
fn rejection(err: &ConnectionError) -> (StatusCode, &'static str) {
    match err {
        ConnectionError::MalformedMessage(_) => (StatusCode::BAD_REQUEST, "malformed"),
        ConnectionError::UnknownDestination(_) => (StatusCode::NOT_FOUND, "unknown_destination"),
        ConnectionError::Consumer(_) => (StatusCode::INTERNAL_SERVER_ERROR, "consumer_failed"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

fn reject(inner: &Inner, status: StatusCode, reason: &str, detail: String) -> Response<Full<Bytes>> {
    warn!("Rejecting inbound request ({}): {}", reason, detail);
    if let Some(metrics) = &inner.metrics {
        metrics.inbound_rejected(reason);
    }
    respond(status, detail)
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    inner: Arc<Inner>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST {
        let detail = format!("method {} not allowed", req.method());
        return Ok(reject(
            &inner,
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            detail,
        ));
    }

    let raw = match read_body(req.into_body(), inner.max_body_size).await {
        Ok(raw) => raw,
        Err(e @ BodyError::TooLarge(_)) => {
            return Ok(reject(
                &inner,
                StatusCode::PAYLOAD_TOO_LARGE,
                "too_large",
                e.to_string(),
            ))
        }
        Err(e) => return Ok(reject(&inner, StatusCode::BAD_REQUEST, "read_failed", e.to_string())),
    };
    if let Some(metrics) = &inner.metrics {
        metrics.inbound_received(raw.len());
    }

    let response = match inner.dispatch(&raw).await {
        Ok(reply) => {
            let mut response = respond(StatusCode::OK, reply.to_json());
            response
                .headers_mut()
                .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            let (status, reason) = rejection(&e);
            reject(&inner, status, reason, e.to_string())
        }
    };

    Ok(response)
}
