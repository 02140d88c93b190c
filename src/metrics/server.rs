//! Scrape endpoint for the Prometheus registry

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::Metrics;

/// Serves `GET /metrics` in the Prometheus text format and `GET /health`
/// for liveness checks.
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    listener: TcpListener,
}

impl MetricsServer {
    /// Bind the scrape endpoint. Port 0 picks a free port.
    pub async fn bind(metrics: Arc<Metrics>, addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { metrics, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve scrapes until `shutdown_rx` fires or its sender is dropped
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if let Ok(addr) = self.local_addr() {
            info!("Metrics server listening on http://{}/metrics", addr);
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept metrics connection: {}", e);
                            continue;
                        }
                    };
                    debug!("Metrics scrape from {}", peer);

                    let metrics = self.metrics.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                            let response = route(req.method(), req.uri().path(), &metrics);
                            async move { Ok::<_, Infallible>(response) }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            error!("Error serving metrics scrape from {}: {:?}", peer, err);
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("Metrics server stopped");
                    return;
                }
            }
        }
    }
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn route(method: &Method, path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    if *method != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "only GET is supported");
    }
    match path {
        "/metrics" => scrape(metrics),
        "/health" | "/ready" => plain(StatusCode::OK, "OK"),
        _ => plain(StatusCode::NOT_FOUND, "no such endpoint"),
    }
}

fn scrape(metrics: &Metrics) -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return plain(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics");
    }

    let mut response = plain(StatusCode::OK, buffer);
    if let Ok(value) = encoder.format_type().parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}
