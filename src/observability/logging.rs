//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Define the per-request forwarding event
//! - Deliver events to a pluggable sink
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Log level comes from `RUST_LOG` when set, otherwise from config
//! - Sinks are synchronous and must not block the request path

use axum::http::{Method, StatusCode};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::proxy::ForwardingOutcome;

/// Install the global subscriber. `default_level` applies when `RUST_LOG`
/// is unset.
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("forward_proxy={default_level},tower_http={default_level}").into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// One record per forwarded request, emitted when the request reaches its outcome.
#[derive(Debug, Clone)]
pub struct ForwardEvent {
    pub timestamp: SystemTime,
    pub request_id: String,
    pub method: Method,
    pub path: String,
    /// `scheme://host:port` of the upstream, once resolved.
    pub upstream: Option<String>,
    pub outcome: ForwardingOutcome,
    /// Status sent to the client, if a response head went out.
    pub status: Option<StatusCode>,
    pub duration: Duration,
    pub bytes_relayed: u64,
}

impl ForwardEvent {
    pub fn timestamp_ms(&self) -> u128 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    }
}

/// Destination for forwarding events.
pub trait LogSink: Send + Sync + fmt::Debug {
    fn emit(&self, event: &ForwardEvent);
}

/// Writes events through `tracing` and records request metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, event: &ForwardEvent) {
        let upstream = event.upstream.as_deref().unwrap_or("-");
        let status = event.status.map(|s| s.as_u16()).unwrap_or(0);
        let duration_ms = event.duration.as_secs_f64() * 1000.0;

        match &event.outcome {
            ForwardingOutcome::Success { .. } | ForwardingOutcome::ClientAborted => {
                tracing::info!(
                    request_id = %event.request_id,
                    method = %event.method,
                    path = %event.path,
                    upstream,
                    outcome = event.outcome.kind(),
                    status,
                    duration_ms,
                    bytes_relayed = event.bytes_relayed,
                    timestamp_ms = event.timestamp_ms() as u64,
                    "Request forwarded"
                );
            }
            other => {
                tracing::warn!(
                    request_id = %event.request_id,
                    method = %event.method,
                    path = %event.path,
                    upstream,
                    outcome = other.kind(),
                    reason = other.reason().unwrap_or(""),
                    status,
                    duration_ms,
                    bytes_relayed = event.bytes_relayed,
                    timestamp_ms = event.timestamp_ms() as u64,
                    "Request failed"
                );
            }
        }

        crate::observability::metrics::record_outcome(event);
    }
}
