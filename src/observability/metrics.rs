//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, bytes, connections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, outcome, status
//! - `proxy_request_duration_seconds` (histogram): time to outcome
//! - `proxy_bytes_relayed_total` (counter): response body bytes sent to clients
//! - `proxy_active_connections` (gauge): open client connections
//! - `proxy_upstream_connections_total` (counter): upstream connections by event
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Without an installed recorder every macro is a no-op

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::observability::logging::ForwardEvent;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_outcome(event: &ForwardEvent) {
    let status = event
        .status
        .map(|s| s.as_u16().to_string())
        .unwrap_or_else(|| "none".to_string());

    metrics::counter!(
        "proxy_requests_total",
        "method" => event.method.to_string(),
        "outcome" => event.outcome.kind(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "proxy_request_duration_seconds",
        "outcome" => event.outcome.kind()
    )
    .record(event.duration.as_secs_f64());
    metrics::counter!("proxy_bytes_relayed_total").increment(event.bytes_relayed);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("proxy_active_connections").set(count as f64);
}
