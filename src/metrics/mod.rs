//! Prometheus metrics for Courier
//!
//! Exposes metrics at /metrics endpoint for monitoring request/reply traffic.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

mod server;

pub use server::MetricsServer;

#[cfg(test)]
mod tests;

/// All Courier metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Outbound request metrics
    pub requests_sent_total: IntCounter,
    pub replies_received_total: IntCounter,
    pub requests_expired_total: IntCounter,
    pub requests_failed_total: IntCounter,
    pub requests_pending: IntGauge,
    pub bytes_sent: IntCounter,

    // Inbound request metrics
    pub inbound_handled_total: IntCounter,
    pub inbound_rejected_total: IntCounterVec,
    pub bytes_received: IntCounter,

    // Performance metrics
    pub round_trip_latency: Histogram,
    pub consumer_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_sent_total = IntCounter::with_opts(Opts::new(
            "courier_requests_sent_total",
            "Total requests transmitted to the remote endpoint",
        ))
        .unwrap();

        let replies_received_total = IntCounter::with_opts(Opts::new(
            "courier_replies_received_total",
            "Total replies that resolved a pending request",
        ))
        .unwrap();

        let requests_expired_total = IntCounter::with_opts(Opts::new(
            "courier_requests_expired_total",
            "Total pending requests rejected because their time-to-live elapsed",
        ))
        .unwrap();

        let requests_failed_total = IntCounter::with_opts(Opts::new(
            "courier_requests_failed_total",
            "Total pending requests rejected by a transport failure",
        ))
        .unwrap();

        let requests_pending = IntGauge::with_opts(Opts::new(
            "courier_requests_pending",
            "Current number of requests awaiting a reply",
        ))
        .unwrap();

        let bytes_sent = IntCounter::with_opts(Opts::new(
            "courier_bytes_sent_total",
            "Total serialized request bytes written",
        ))
        .unwrap();

        let inbound_handled_total = IntCounter::with_opts(Opts::new(
            "courier_inbound_handled_total",
            "Total inbound requests answered by a consumer",
        ))
        .unwrap();

        let inbound_rejected_total = IntCounterVec::new(
            Opts::new(
                "courier_inbound_rejected_total",
                "Total inbound requests rejected before a reply was produced",
            ),
            &["reason"],
        )
        .unwrap();

        let bytes_received = IntCounter::with_opts(Opts::new(
            "courier_bytes_received_total",
            "Total inbound request bytes read",
        ))
        .unwrap();

        let round_trip_latency = Histogram::with_opts(
            HistogramOpts::new(
                "courier_round_trip_seconds",
                "Time from transmitting a request to receiving its reply",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .unwrap();

        let consumer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "courier_consumer_duration_seconds",
                "Time spent in a consumer handling an inbound request",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .unwrap();

        registry
            .register(Box::new(requests_sent_total.clone()))
            .unwrap();
        registry
            .register(Box::new(replies_received_total.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_expired_total.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_failed_total.clone()))
            .unwrap();
        registry
            .register(Box::new(requests_pending.clone()))
            .unwrap();
        registry.register(Box::new(bytes_sent.clone())).unwrap();
        registry
            .register(Box::new(inbound_handled_total.clone()))
            .unwrap();
        registry
            .register(Box::new(inbound_rejected_total.clone()))
            .unwrap();
        registry.register(Box::new(bytes_received.clone())).unwrap();
        registry
            .register(Box::new(round_trip_latency.clone()))
            .unwrap();
        registry
            .register(Box::new(consumer_duration.clone()))
            .unwrap();

        Self {
            registry,
            requests_sent_total,
            replies_received_total,
            requests_expired_total,
            requests_failed_total,
            requests_pending,
            bytes_sent,
            inbound_handled_total,
            inbound_rejected_total,
            bytes_received,
            round_trip_latency,
            consumer_duration,
        }
    }

    // Outbound helpers

    pub fn request_sent(&self, bytes: usize) {
        self.requests_sent_total.inc();
        self.bytes_sent.inc_by(bytes as u64);
    }

    pub fn request_registered(&self) {
        self.requests_pending.inc();
    }

    pub fn reply_received(&self, latency_secs: f64) {
        self.requests_pending.dec();
        self.replies_received_total.inc();
        self.round_trip_latency.observe(latency_secs);
    }

    pub fn request_expired(&self) {
        self.requests_pending.dec();
        self.requests_expired_total.inc();
    }

    pub fn request_failed(&self) {
        self.requests_pending.dec();
        self.requests_failed_total.inc();
    }

    // Inbound helpers

    pub fn inbound_received(&self, bytes: usize) {
        self.bytes_received.inc_by(bytes as u64);
    }

    pub fn inbound_handled(&self, duration_secs: f64) {
        self.inbound_handled_total.inc();
        self.consumer_duration.observe(duration_secs);
    }

    pub fn inbound_rejected(&self, reason: &str) {
        self.inbound_rejected_total
            .with_label_values(&[reason])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
