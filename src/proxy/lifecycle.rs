//! Per-request state machine.
//!
//! # Responsibilities
//! - Track a request through `Received → Resolved → Translated → Dispatching
//!   → Relaying → Done(outcome)`
//! - Reject illegal transitions
//! - Emit exactly one `ForwardEvent` when the request reaches `Done`
//!
//! # Design Decisions
//! - `Done` is reachable from every other stage; nothing leaves `Done`
//! - Dropping a lifecycle that never reached `Done` records `ClientAborted`:
//!   hyper drops the handler future or the response body when the client goes
//!   away, and that drop is the only signal the proxy gets

use axum::body::Body;
use axum::http::{Method, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::time::Instant;

use crate::http::request::InboundRequest;
use crate::http::response::error_response;
use crate::observability::{ForwardEvent, LogSink};
use crate::proxy::outcome::ForwardingOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Received,
    Resolved,
    Translated,
    Dispatching,
    Relaying,
    Done(ForwardingOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal lifecycle transition {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Resolved => "resolved",
            Stage::Translated => "translated",
            Stage::Dispatching => "dispatching",
            Stage::Relaying => "relaying",
            Stage::Done(_) => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Stage::Done(_))
    }

    /// The transition function.
    pub fn advance(&self, next: Stage) -> Result<Stage, TransitionError> {
        let legal = match (self, &next) {
            (Stage::Done(_), _) => false,
            (_, Stage::Done(_)) => true,
            (Stage::Received, Stage::Resolved)
            | (Stage::Resolved, Stage::Translated)
            | (Stage::Translated, Stage::Dispatching)
            | (Stage::Dispatching, Stage::Relaying) => true,
            _ => false,
        };

        if legal {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Done(outcome) => write!(f, "done({})", outcome.kind()),
            other => f.write_str(other.name()),
        }
    }
}

/// Fixed facts about the request, captured on arrival.
#[derive(Debug, Clone)]
struct RequestContext {
    request_id: String,
    method: Method,
    path: String,
    upstream: Option<String>,
    timestamp: SystemTime,
    started: Instant,
}

/// Owns a request's stage and guarantees its single outcome.
#[derive(Debug)]
pub struct RequestLifecycle {
    stage: Stage,
    context: RequestContext,
    sink: Arc<dyn LogSink>,
    bytes_relayed: u64,
    status_sent: Option<StatusCode>,
}

impl RequestLifecycle {
    pub fn new(request: &InboundRequest, sink: Arc<dyn LogSink>) -> Self {
        Self {
            stage: Stage::Received,
            context: RequestContext {
                request_id: request.id.clone(),
                method: request.method().clone(),
                path: request.uri().path().to_string(),
                upstream: None,
                timestamp: request.timestamp,
                started: request.received_at,
            },
            sink,
            bytes_relayed: 0,
            status_sent: None,
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn request_id(&self) -> &str {
        &self.context.request_id
    }

    pub fn set_upstream(&mut self, upstream: impl Into<String>) {
        self.context.upstream = Some(upstream.into());
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: Stage) {
        match self.stage.advance(next) {
            Ok(stage) => self.stage = stage,
            Err(e) => tracing::error!(request_id = %self.context.request_id, error = %e, "Lifecycle transition rejected"),
        }
    }

    /// Record the status line sent to the client.
    pub fn status_sent(&mut self, status: StatusCode) {
        self.status_sent = Some(status);
    }

    pub fn add_bytes(&mut self, n: u64) {
        self.bytes_relayed += n;
    }

    /// Reach `Done` with `outcome` and emit the event.
    pub fn finish(mut self, outcome: ForwardingOutcome) {
        self.complete(outcome);
    }

    /// Finish with `outcome` and build the synthetic error response.
    pub fn reject(mut self, status: StatusCode, outcome: ForwardingOutcome) -> Response<Body> {
        let response = error_response(status, self.request_id());
        self.status_sent = Some(status);
        self.complete(outcome);
        response
    }

    fn complete(&mut self, outcome: ForwardingOutcome) {
        let next = self.stage.advance(Stage::Done(outcome.clone()));
        let Ok(stage) = next else {
            tracing::error!(request_id = %self.context.request_id, outcome = %outcome, "Outcome already recorded");
            return;
        };
        self.stage = stage;

        let event = ForwardEvent {
            timestamp: self.context.timestamp,
            request_id: self.context.request_id.clone(),
            method: self.context.method.clone(),
            path: self.context.path.clone(),
            upstream: self.context.upstream.clone(),
            outcome,
            status: self.status_sent,
            duration: self.context.started.elapsed(),
            bytes_relayed: self.bytes_relayed,
        };
        self.sink.emit(&event);
    }
}

impl Drop for RequestLifecycle {
    fn drop(&mut self) {
        if !self.stage.is_done() {
            self.complete(ForwardingOutcome::ClientAborted);
        }
    }
}
