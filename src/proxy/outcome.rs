//! The result of forwarding one request.

use axum::http::StatusCode;
use std::fmt;

use crate::routing::ResolutionError;
use crate::upstream::DispatchError;

/// Terminal outcome of a forwarded request; exactly one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardingOutcome {
    /// The upstream response was relayed in full.
    Success {
        status: StatusCode,
        bytes_relayed: u64,
    },
    ResolutionFailed {
        reason: String,
    },
    UpstreamUnreachable {
        reason: String,
    },
    UpstreamTimeout,
    /// The client went away before the response was complete.
    ClientAborted,
    /// The response head was sent but the body could not be finished.
    RelayError {
        reason: String,
    },
}

impl ForwardingOutcome {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardingOutcome::Success { .. } => "success",
            ForwardingOutcome::ResolutionFailed { .. } => "resolution_failed",
            ForwardingOutcome::UpstreamUnreachable { .. } => "upstream_unreachable",
            ForwardingOutcome::UpstreamTimeout => "upstream_timeout",
            ForwardingOutcome::ClientAborted => "client_aborted",
            ForwardingOutcome::RelayError { .. } => "relay_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ForwardingOutcome::Success { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ForwardingOutcome::ResolutionFailed { reason }
            | ForwardingOutcome::UpstreamUnreachable { reason }
            | ForwardingOutcome::RelayError { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for ForwardingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {reason}", self.kind()),
            None => f.write_str(self.kind()),
        }
    }
}

impl From<&ResolutionError> for ForwardingOutcome {
    fn from(err: &ResolutionError) -> Self {
        ForwardingOutcome::ResolutionFailed {
            reason: err.to_string(),
        }
    }
}

impl From<&DispatchError> for ForwardingOutcome {
    fn from(err: &DispatchError) -> Self {
        match err {
            DispatchError::Timeout(_) => ForwardingOutcome::UpstreamTimeout,
            other => ForwardingOutcome::UpstreamUnreachable {
                reason: other.to_string(),
            },
        }
    }
}
