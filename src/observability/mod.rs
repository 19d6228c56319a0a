//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request lifecycle reaches its outcome:
//!     → logging.rs (ForwardEvent → LogSink)
//!         → TracingSink: structured log line
//!         → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Exactly one event per request, emitted by the lifecycle
//! - Request ID flows from the inbound header (or a fresh UUID) into every event
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::{init_tracing, ForwardEvent, LogSink, TracingSink};
