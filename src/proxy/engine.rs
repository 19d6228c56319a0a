//! The forwarding engine: one inbound request in, one response out.
//!
//! # Responsibilities
//! - Drive each request through resolve, translate, dispatch and relay
//! - Map every stage failure to exactly one outcome
//! - Answer failures before the first upstream byte with 400/502/504
//! - Refuse requests whose `Via` shows they already passed through here (508)
//!
//! # Design Decisions
//! - The engine holds no per-request state; everything lives in the
//!   `RequestLifecycle`, which moves into the response body once relaying starts
//! - Collaborators (resolver, pool, sink) are injected trait objects

use axum::body::Body;
use axum::http::{Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::http::headers::{via_names_self, VIA_PSEUDONYM};
use crate::http::request::{translate, InboundRequest};
use crate::http::response::relay;
use crate::observability::{LogSink, TracingSink};
use crate::proxy::lifecycle::{RequestLifecycle, Stage};
use crate::proxy::outcome::ForwardingOutcome;
use crate::resilience::Timeouts;
use crate::routing::{self, ResolutionError, ResolvedTarget, Resolver};
use crate::upstream::{self, ConnectionPool, Dispatcher, PoolStats};

#[derive(Debug, Clone)]
pub struct ForwardingEngine {
    resolver: Arc<dyn Resolver>,
    dispatcher: Dispatcher,
    sink: Arc<dyn LogSink>,
    timeouts: Timeouts,
}

impl ForwardingEngine {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        pool: Arc<dyn ConnectionPool>,
        timeouts: Timeouts,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            resolver,
            dispatcher: Dispatcher::new(pool, timeouts),
            sink,
            timeouts,
        }
    }

    /// Build the engine described by `config`, logging through `tracing`.
    ///
    /// Must be called inside a Tokio runtime: the pool spawns its reaper.
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            routing::from_config(&config.routing),
            upstream::pool::from_config(&config.pool),
            Timeouts::from_config(&config.timeouts),
            Arc::new(TracingSink),
        )
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.dispatcher.pool().stats()
    }

    /// Forward one request from `peer`.
    pub async fn handle(&self, request: Request<Body>, peer: SocketAddr) -> Response<Body> {
        let inbound = InboundRequest::new(request, peer);
        let deadline = self.timeouts.deadline_from(inbound.received_at);
        let mut lifecycle = RequestLifecycle::new(&inbound, Arc::clone(&self.sink));

        tracing::debug!(
            request_id = %inbound.id,
            method = %inbound.method(),
            uri = %inbound.uri(),
            peer = %peer,
            "Forwarding request"
        );

        let target = match self.resolve(&inbound) {
            Ok(target) => target,
            Err(e) => return lifecycle.reject(e.status(), ForwardingOutcome::from(&e)),
        };
        lifecycle.set_upstream(target.to_string());
        lifecycle.advance(Stage::Resolved);

        let outbound = match translate(inbound, &target) {
            Ok(outbound) => outbound,
            Err(e) => return lifecycle.reject(e.status(), ForwardingOutcome::from(&e)),
        };
        lifecycle.advance(Stage::Translated);

        lifecycle.advance(Stage::Dispatching);
        let response = match self.dispatcher.dispatch(outbound, deadline).await {
            Ok(response) => response,
            Err(e) => return lifecycle.reject(e.status(), ForwardingOutcome::from(&e)),
        };

        lifecycle.advance(Stage::Relaying);
        relay(response, lifecycle, &self.timeouts, deadline)
    }

    /// Refuse requests this proxy already forwarded, then ask the resolver.
    fn resolve(&self, inbound: &InboundRequest) -> Result<ResolvedTarget, ResolutionError> {
        if via_names_self(inbound.headers()) {
            return Err(ResolutionError::ForwardingLoop(VIA_PSEUDONYM.to_string()));
        }
        self.resolver.resolve(inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::ForwardEvent;
    use crate::upstream::UpstreamPool;
    use axum::http::uri::Scheme;
    use axum::http::StatusCode;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<ForwardEvent>>);

    impl LogSink for Recorder {
        fn emit(&self, event: &ForwardEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[derive(Debug)]
    struct Fixed(Result<ResolvedTarget, ResolutionError>);

    impl Resolver for Fixed {
        fn resolve(&self, _request: &InboundRequest) -> Result<ResolvedTarget, ResolutionError> {
            self.0.clone()
        }
    }

    fn engine(resolver: Fixed, recorder: Arc<Recorder>) -> ForwardingEngine {
        ForwardingEngine::new(
            Arc::new(resolver),
            Arc::new(UpstreamPool::new(4, Duration::from_secs(60))),
            Timeouts::default(),
            recorder,
        )
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn resolution_failure_is_rejected_without_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(
            Fixed(Err(ResolutionError::NoRouteMatched("/unknown".into()))),
            recorder.clone(),
        );

        let request = Request::builder()
            .uri("/unknown")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(engine.pool_stats().created, 0);
        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome.kind(), "resolution_failed");
        assert_eq!(events[0].upstream, None);
    }

    #[tokio::test]
    async fn request_carrying_own_via_is_refused() {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(
            Fixed(Ok(ResolvedTarget::new(Scheme::HTTP, "127.0.0.1", 1))),
            recorder.clone(),
        );

        let request = Request::builder()
            .uri("/loop")
            .header("via", "1.1 forward-proxy")
            .body(Body::empty())
            .unwrap();
        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::LOOP_DETECTED);
        assert_eq!(engine.pool_stats().created, 0);
        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome.kind(), "resolution_failed");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let recorder = Arc::new(Recorder::default());
        let engine = engine(
            Fixed(Ok(ResolvedTarget::new(Scheme::HTTP, "127.0.0.1", port))),
            recorder.clone(),
        );

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = engine.handle(request, peer()).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome.kind(), "upstream_unreachable");
        assert_eq!(events[0].status, Some(StatusCode::BAD_GATEWAY));
    }

    #[tokio::test]
    async fn relayed_response_records_success_once_body_is_read() {
        let app = axum::Router::new().route("/", axum::routing::get(|| async { "pong" }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let recorder = Arc::new(Recorder::default());
        let engine = engine(
            Fixed(Ok(ResolvedTarget::new(Scheme::HTTP, "127.0.0.1", port))),
            recorder.clone(),
        );

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = engine.handle(request, peer()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(recorder.0.lock().unwrap().is_empty());

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"pong");

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].outcome,
            ForwardingOutcome::Success {
                status: StatusCode::OK,
                bytes_relayed: 4
            }
        );
        assert_eq!(engine.pool_stats().idle, 1);
    }
}
