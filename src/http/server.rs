//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router that hands every request to the forwarding engine
//! - Wire up middleware (tracing, request ID)
//! - Serve each accepted connection with hyper's HTTP/1.1 server
//! - Drain connections on shutdown
//!
//! # Design Decisions
//! - Custom accept loop over `net::Listener` so connection limits and drain
//!   tracking apply to every client connection
//! - HTTP/1.1 only; pipelined requests are answered in arrival order
//! - No request-level timeout layer: upstream limits live in the engine and
//!   map to 504, never 408

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    response::Response,
    Extension, Router,
};
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::proxy::ForwardingEngine;

/// How long shutdown waits for in-flight requests.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: ForwardingEngine,
}

/// HTTP server for the forward proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    engine: ForwardingEngine,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let engine = ForwardingEngine::from_config(&config);
        Self::with_engine(config, engine)
    }

    /// Create a server around an engine built elsewhere.
    pub fn with_engine(config: ProxyConfig, engine: ForwardingEngine) -> Self {
        let state = AppState {
            engine: engine.clone(),
        };
        Self {
            router: Self::build_router(state),
            config,
            engine,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "HTTP server starting");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e) => return Err(e),
                },
                _ = shutdown.recv() => break,
            }
        }

        drop(listener);
        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Stopped accepting, draining connections"
        );
        self.tracker.begin_drain();
        let remaining = self.tracker.wait_idle(DRAIN_TIMEOUT).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Drain timeout elapsed with connections still open");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let guard = self.tracker.track();
        metrics::set_active_connections(self.tracker.active_count());
        let tracker = self.tracker.clone();
        let mut drain = self.tracker.drain_receiver();
        let service = TowerToHyperService::new(
            self.router.clone().layer(Extension(ConnectInfo(peer))),
        );

        tokio::spawn(async move {
            let _permit = permit;
            let connection_id = guard.id();
            let conn = hyper::server::conn::http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            tracing::debug!(connection_id = %connection_id, peer = %peer, error = %e, "Client connection ended with error");
                        }
                        break;
                    }
                    _ = drain.wait_for(|draining| *draining), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }

            drop(guard);
            metrics::set_active_connections(tracker.active_count());
        });
    }

    pub fn engine(&self) -> &ForwardingEngine {
        &self.engine
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Every request, whatever its path, goes to the forwarding engine.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response<Body> {
    state.engine.handle(request, peer).await
}
