//! Metrics tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use prometheus::Encoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use super::*;

/// Issue one request and return the raw response text
async fn fetch(addr: SocketAddr, method: &str, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        method, path, addr
    );
    stream.write_all(head.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => response.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&response).into_owned()
}

#[test]
fn test_pending_gauge_tracks_outcomes() {
    let metrics = Metrics::new();
    metrics.request_registered();
    metrics.request_registered();
    metrics.request_registered();
    assert_eq!(metrics.requests_pending.get(), 3);

    metrics.reply_received(0.01);
    metrics.request_expired();
    metrics.request_failed();
    assert_eq!(metrics.requests_pending.get(), 0);
    assert_eq!(metrics.replies_received_total.get(), 1);
    assert_eq!(metrics.requests_expired_total.get(), 1);
    assert_eq!(metrics.requests_failed_total.get(), 1);
    assert_eq!(metrics.round_trip_latency.get_sample_count(), 1);
}

#[test]
fn test_inbound_rejections_by_reason() {
    let metrics = Metrics::new();
    metrics.inbound_rejected("malformed");
    metrics.inbound_rejected("malformed");
    metrics.inbound_rejected("unknown_destination");

    let rejected = &metrics.inbound_rejected_total;
    assert_eq!(rejected.with_label_values(&["malformed"]).get(), 2);
    assert_eq!(rejected.with_label_values(&["unknown_destination"]).get(), 1);
}

#[test]
fn test_registry_exports_courier_metrics() {
    let metrics = Metrics::new();
    metrics.request_sent(42);
    let mut buffer = Vec::new();
    prometheus::TextEncoder::new()
        .encode(&metrics.registry.gather(), &mut buffer)
        .unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert!(text.contains("courier_requests_sent_total 1"));
    assert!(text.contains("courier_bytes_sent_total 42"));
    assert_eq!(metrics.bytes_sent.get(), 42);
}

#[tokio::test]
async fn test_server_serves_scrape_and_health() {
    let metrics = Arc::new(Metrics::new());
    metrics.request_sent(7);

    let server = MetricsServer::bind(metrics.clone(), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(server.run(shutdown_rx));

    let scrape = fetch(addr, "GET", "/metrics").await;
    assert!(scrape.starts_with("HTTP/1.1 200"), "{}", scrape);
    assert!(scrape.contains("text/plain"));
    assert!(scrape.contains("courier_requests_sent_total 1"));
    assert!(scrape.contains("courier_bytes_sent_total 7"));

    // Scrapes observe live values
    metrics.request_sent(1);
    assert!(fetch(addr, "GET", "/metrics")
        .await
        .contains("courier_requests_sent_total 2"));

    let health = fetch(addr, "GET", "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.ends_with("OK"));

    assert!(fetch(addr, "GET", "/nope").await.starts_with("HTTP/1.1 404"));
    assert!(fetch(addr, "POST", "/metrics").await.starts_with("HTTP/1.1 405"));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_server_bind_conflict() {
    let metrics = Arc::new(Metrics::new());
    let first = MetricsServer::bind(metrics.clone(), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let taken = first.local_addr().unwrap();
    assert!(MetricsServer::bind(metrics, taken).await.is_err());
}
