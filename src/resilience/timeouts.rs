//! Timeout enforcement.
//!
//! # Responsibilities
//! - Carry the connect, idle and exchange limits for one upstream exchange
//! - Derive the absolute exchange deadline from the request's arrival
//!
//! # Design Decisions
//! - Uses Tokio's clock so tests can pause and advance time
//! - The three limits are independent; whichever fires first aborts
//! - Timed-out exchanges before the response head become 504 Gateway Timeout

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::TimeoutConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect to the upstream.
    pub connect: Duration,
    /// Longest stretch without read or write progress.
    pub idle: Duration,
    /// Whole exchange, measured from request arrival.
    pub exchange: Duration,
}

impl Timeouts {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_ms),
            idle: Duration::from_millis(config.idle_ms),
            exchange: Duration::from_millis(config.exchange_ms),
        }
    }

    pub fn deadline_from(&self, start: Instant) -> Instant {
        start + self.exchange
    }

    /// Connect timeout, shortened if the exchange deadline is closer.
    pub fn connect_within(&self, deadline: Instant) -> Duration {
        self.connect
            .min(deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

/// Which limit expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Idle,
    Exchange,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Connect => f.write_str("connect timeout"),
            TimeoutKind::Idle => f.write_str("idle timeout"),
            TimeoutKind::Exchange => f.write_str("exchange deadline exceeded"),
        }
    }
}
