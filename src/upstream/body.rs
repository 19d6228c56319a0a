//! Outbound request body: the client's body stream, observed.
//!
//! The stream is passed through frame by frame. `UploadProgress` records
//! whether it ended cleanly, failed, or is still running, and when it last
//! made progress, so the dispatcher can enforce the idle timeout and refuse
//! to reuse a connection whose request was never fully written.

use axum::body::Body;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;

/// Where the upload stands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Streaming = 0,
    Complete = 1,
    Failed = 2,
}

impl From<u8> for UploadState {
    fn from(val: u8) -> Self {
        match val {
            1 => UploadState::Complete,
            2 => UploadState::Failed,
            _ => UploadState::Streaming,
        }
    }
}

/// Shared view of an upload's state.
#[derive(Debug)]
pub struct UploadProgress {
    state: AtomicU8,
    origin: Instant,
    /// Nanoseconds after `origin` of the last observed progress.
    last_activity: AtomicU64,
    bytes: AtomicU64,
}

impl UploadProgress {
    fn new(already_complete: bool) -> Self {
        let state = if already_complete {
            UploadState::Complete
        } else {
            UploadState::Streaming
        };
        Self {
            state: AtomicU8::new(state as u8),
            origin: Instant::now(),
            last_activity: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Record progress now.
    pub fn touch(&self) {
        let nanos = self.origin.elapsed().as_nanos() as u64;
        self.last_activity.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last_activity.load(Ordering::Relaxed))
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    pub fn state(&self) -> UploadState {
        UploadState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_complete(&self) -> bool {
        self.state() == UploadState::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.state() == UploadState::Failed
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn finish(&self, state: UploadState) {
        // Only the first terminal state sticks.
        let _ = self.state.compare_exchange(
            UploadState::Streaming as u8,
            state as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.touch();
    }
}

/// Body sent upstream; wraps the inbound body without buffering it.
#[derive(Debug)]
pub struct UploadBody {
    inner: Body,
    progress: Arc<UploadProgress>,
}

impl UploadBody {
    pub fn new(inner: Body) -> (Self, Arc<UploadProgress>) {
        let progress = Arc::new(UploadProgress::new(inner.is_end_stream()));
        let body = Self {
            inner,
            progress: Arc::clone(&progress),
        };
        (body, progress)
    }
}

impl HttpBody for UploadBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.progress
                        .bytes
                        .fetch_add(data.len() as u64, Ordering::Relaxed);
                }
                this.progress.touch();
                if this.inner.is_end_stream() {
                    this.progress.finish(UploadState::Complete);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.progress.finish(UploadState::Failed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.progress.finish(UploadState::Complete);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
