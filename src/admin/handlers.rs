use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::upstream::PoolStats;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_connections: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        active_connections: state.connections.active_count(),
    })
}

pub async fn get_pool(State(state): State<AdminState>) -> Json<PoolStats> {
    Json(state.engine.pool_stats())
}
