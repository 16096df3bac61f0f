//! Process-wide metrics with Prometheus text export.
//!
//! Every collector is registered against an owned [`Registry`] so tests
//! can construct isolated instances; the running server uses the shared
//! instance behind [`Metrics::shared`].

use std::sync::{Arc, LazyLock};

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

static SHARED: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

/// Counters, gauges and histograms for every protocol the server speaks.
pub struct Metrics {
    registry: Registry,

    pub http_requests_total: IntCounter,
    pub http_request_duration_seconds: Histogram,
    pub http_response_size_bytes: Histogram,
    pub http_active_connections: IntGauge,

    pub sse_active_connections: IntGauge,
    pub sse_events_sent_total: IntCounter,
    pub sse_events_dropped_total: IntCounter,

    pub ws_active_connections: IntGauge,
    pub ws_messages_total: IntCounter,
    pub ws_handshake_failures_total: IntCounter,
}

impl Metrics {
    /// Build a fresh metrics set with its own registry.
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounter::with_opts(Opts::new(
            "http_requests_total",
            "Total number of HTTP requests served",
        ))
        .expect("valid counter opts");

        let http_request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request handling latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .expect("valid histogram opts");

        let http_response_size_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "http_response_size_bytes",
                "HTTP response sizes in bytes",
            )
            .buckets(vec![
                256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262_144.0, 1_048_576.0,
            ]),
        )
        .expect("valid histogram opts");

        let http_active_connections = IntGauge::with_opts(Opts::new(
            "http_active_connections",
            "Currently open client connections",
        ))
        .expect("valid gauge opts");

        let sse_active_connections = IntGauge::with_opts(Opts::new(
            "sse_active_connections",
            "Currently open SSE connections",
        ))
        .expect("valid gauge opts");

        let sse_events_sent_total = IntCounter::with_opts(Opts::new(
            "sse_events_sent_total",
            "SSE events written to clients",
        ))
        .expect("valid counter opts");

        let sse_events_dropped_total = IntCounter::with_opts(Opts::new(
            "sse_events_dropped_total",
            "SSE events dropped because a connection queue stayed full",
        ))
        .expect("valid counter opts");

        let ws_active_connections = IntGauge::with_opts(Opts::new(
            "ws_active_connections",
            "Currently open WebSocket connections",
        ))
        .expect("valid gauge opts");

        let ws_messages_total = IntCounter::with_opts(Opts::new(
            "ws_messages_total",
            "WebSocket data messages received",
        ))
        .expect("valid counter opts");

        let ws_handshake_failures_total = IntCounter::with_opts(Opts::new(
            "ws_handshake_failures_total",
            "WebSocket upgrade requests rejected during the handshake",
        ))
        .expect("valid counter opts");

        for collector in [
            Box::new(http_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(http_request_duration_seconds.clone()),
            Box::new(http_response_size_bytes.clone()),
            Box::new(http_active_connections.clone()),
            Box::new(sse_active_connections.clone()),
            Box::new(sse_events_sent_total.clone()),
            Box::new(sse_events_dropped_total.clone()),
            Box::new(ws_active_connections.clone()),
            Box::new(ws_messages_total.clone()),
            Box::new(ws_handshake_failures_total.clone()),
        ] {
            registry.register(collector).expect("unique collector");
        }

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_response_size_bytes,
            http_active_connections,
            sse_active_connections,
            sse_events_sent_total,
            sse_events_dropped_total,
            ws_active_connections,
            ws_messages_total,
            ws_handshake_failures_total,
        }
    }

    /// The process-wide instance.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        SHARED.clone()
    }

    /// Render all collectors in Prometheus text exposition format.
    #[must_use]
    pub fn export(&self) -> String {
        let mut out = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut out) {
            tracing::debug!("metrics encoding failed: {err}");
        }
        String::from_utf8(out).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_help_and_type_lines() {
        let metrics = Metrics::new();
        metrics.http_requests_total.inc();
        metrics.http_response_size_bytes.observe(512.0);
        metrics.http_request_duration_seconds.observe(0.02);
        metrics.http_active_connections.set(3);

        let text = metrics.export();
        assert!(text.contains("# HELP http_requests_total"));
        assert!(text.contains("# TYPE http_requests_total counter"));
        assert!(text.contains("# TYPE http_response_size_bytes histogram"));
        assert!(text.contains("# TYPE http_request_duration_seconds histogram"));
        assert!(text.contains("# TYPE http_active_connections gauge"));
        assert!(text.contains("http_requests_total 1"));
        assert!(text.contains("http_active_connections 3"));
    }

    #[test]
    fn sse_and_ws_series_are_exported() {
        let metrics = Metrics::new();
        metrics.sse_events_dropped_total.inc();
        metrics.ws_messages_total.inc();

        let text = metrics.export();
        assert!(text.contains("sse_events_dropped_total 1"));
        assert!(text.contains("ws_messages_total 1"));
        assert!(text.contains("sse_active_connections 0"));
    }

    #[test]
    fn instances_are_isolated() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.http_requests_total.inc();
        assert_eq!(b.http_requests_total.get(), 0);
    }
}
