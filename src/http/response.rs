//! Response handling and transformation.
//!
//! # Responsibilities
//! - Transform the upstream response head for the client
//! - Stream the upstream body to the client under backpressure
//! - Decide the upstream connection's fate when the body ends; an upload
//!   still running at that point fails the exchange
//! - Build synthetic error responses for failures before the first byte
//!
//! # Design Decisions
//! - Streaming responses avoid buffering the body; a frame is only pulled
//!   from the upstream when hyper asks for the next one
//! - Hop-by-hop headers stripped automatically
//! - Mid-body failures end the stream with an error so hyper truncates the
//!   response; the status already sent is never changed

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use hyper::body::Incoming;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, Sleep};

use crate::http::headers::{append_via, strip_hop_by_hop};
use crate::http::request::X_REQUEST_ID;
use crate::proxy::{ForwardingOutcome, RequestLifecycle};
use crate::resilience::{TimeoutKind, Timeouts};
use crate::upstream::{PooledConnection, UploadProgress, UpstreamResponse};

/// Why a relayed body stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("upstream body failed: {0}")]
    Upstream(String),
    #[error("upstream {0} while relaying body")]
    Timeout(TimeoutKind),
    #[error("request body not fully sent")]
    UploadIncomplete,
}

/// Plain-text error response for failures before any upstream byte was sent.
pub fn error_response(status: StatusCode, request_id: &str) -> Response<Body> {
    let text = format!(
        "{} {}\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Ok(id) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(X_REQUEST_ID, id);
    }
    response
}

/// Turn an upstream response into the client response.
///
/// The lifecycle moves into the body and reaches `Done` when the body does.
pub fn relay(
    upstream: UpstreamResponse,
    mut lifecycle: RequestLifecycle,
    timeouts: &Timeouts,
    deadline: Instant,
) -> Response<Body> {
    let UpstreamResponse {
        mut parts,
        body,
        connection,
        progress,
    } = upstream;

    strip_hop_by_hop(&mut parts.headers);
    append_via(&mut parts.headers);
    lifecycle.status_sent(parts.status);

    let body = RelayBody::new(
        body,
        connection,
        progress,
        lifecycle,
        parts.status,
        timeouts.idle,
        deadline,
    );
    Response::from_parts(parts, Body::new(body))
}

/// Body streamed from the upstream connection to the client.
#[derive(Debug)]
pub struct RelayBody {
    inner: Incoming,
    connection: Option<PooledConnection>,
    progress: Arc<UploadProgress>,
    lifecycle: Option<RequestLifecycle>,
    status: StatusCode,
    bytes: u64,
    idle: Duration,
    idle_timer: Pin<Box<Sleep>>,
    /// Whether `idle_timer` is measuring a wait on the upstream; time spent
    /// waiting on the client does not count as upstream idleness.
    idle_armed: bool,
    deadline: Pin<Box<Sleep>>,
}

impl RelayBody {
    fn new(
        inner: Incoming,
        connection: PooledConnection,
        progress: Arc<UploadProgress>,
        lifecycle: RequestLifecycle,
        status: StatusCode,
        idle: Duration,
        deadline: Instant,
    ) -> Self {
        let mut body = Self {
            inner,
            connection: Some(connection),
            progress,
            lifecycle: Some(lifecycle),
            status,
            bytes: 0,
            idle,
            idle_timer: Box::pin(tokio::time::sleep(idle)),
            idle_armed: true,
            deadline: Box::pin(tokio::time::sleep_until(deadline)),
        };
        // Bodies that are empty up front (HEAD, 204, 304, zero length) may
        // never be polled.
        if body.inner.is_end_stream() {
            body.complete();
        }
        body
    }

    fn complete(&mut self) {
        // An early response does not make an unfinished upload a success.
        if !self.progress.is_complete() {
            self.fail(RelayError::UploadIncomplete);
            return;
        }
        if let Some(mut connection) = self.connection.take() {
            connection.mark_reusable();
        }
        if let Some(lifecycle) = self.lifecycle.take() {
            lifecycle.finish(ForwardingOutcome::Success {
                status: self.status,
                bytes_relayed: self.bytes,
            });
        }
    }

    fn fail(&mut self, error: RelayError) -> RelayError {
        // Dropping the unmarked connection discards it.
        self.connection.take();
        if let Some(lifecycle) = self.lifecycle.take() {
            lifecycle.finish(ForwardingOutcome::RelayError {
                reason: error.to_string(),
            });
        }
        error
    }

    fn is_finished(&self) -> bool {
        self.lifecycle.is_none()
    }
}

impl HttpBody for RelayBody {
    type Data = Bytes;
    type Error = RelayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.is_finished() {
            return Poll::Ready(None);
        }

        if !this.idle_armed {
            let next = Instant::now() + this.idle;
            this.idle_timer.as_mut().reset(next);
            this.idle_armed = true;
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    let n = data.len() as u64;
                    this.bytes += n;
                    if let Some(lifecycle) = this.lifecycle.as_mut() {
                        lifecycle.add_bytes(n);
                    }
                }
                this.idle_armed = false;
                if this.inner.is_end_stream() {
                    this.complete();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                let error = this.fail(RelayError::Upstream(e.to_string()));
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => {
                if this.deadline.as_mut().poll(cx).is_ready() {
                    let error = this.fail(RelayError::Timeout(TimeoutKind::Exchange));
                    return Poll::Ready(Some(Err(error)));
                }
                if this.idle_timer.as_mut().poll(cx).is_ready() {
                    let error = this.fail(RelayError::Timeout(TimeoutKind::Idle));
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Pending
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
