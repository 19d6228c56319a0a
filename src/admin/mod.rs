//! Admin API: read-only status and pool statistics on a separate listener.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::config::AdminConfig;
use crate::net::ConnectionTracker;
use crate::proxy::ForwardingEngine;

#[derive(Clone)]
pub struct AdminState {
    pub engine: ForwardingEngine,
    pub connections: ConnectionTracker,
    pub api_key: Option<Arc<str>>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(config: &AdminConfig, engine: ForwardingEngine, connections: ConnectionTracker) -> Self {
        Self {
            engine,
            connections,
            api_key: config.api_key.as_deref().map(Arc::from),
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/pool", get(get_pool))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
