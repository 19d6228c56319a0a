//! Upstream dispatch: one outbound request, one upstream exchange.
//!
//! # Responsibilities
//! - Acquire a connection for the request's pool key (reused or fresh)
//! - Write the request head and stream the body upstream
//! - Wait for the response head within the idle and exchange limits
//! - Classify failures as connect, write, read, or timeout
//!
//! # Design Decisions
//! - The request is written in origin form; the Host header names the upstream
//! - A reused connection that closes before the request is written is replaced
//!   by a fresh one; nothing is ever re-sent once bytes have left
//! - The connection travels with the response so the relay decides its fate

use axum::http::{response, Request, StatusCode, Uri};
use hyper::body::Incoming;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

use crate::http::request::OutboundRequest;
use crate::resilience::{TimeoutKind, Timeouts};
use crate::upstream::body::{UploadBody, UploadProgress};
use crate::upstream::connection::UpstreamConnection;
use crate::upstream::pool::{ConnectionPool, PoolKey, PooledConnection};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("upstream connect failed: {0}")]
    ConnectFailed(String),
    #[error("writing request upstream failed: {0}")]
    WriteFailed(String),
    #[error("reading upstream response failed: {0}")]
    ReadFailed(String),
    #[error("upstream {0}")]
    Timeout(TimeoutKind),
}

impl DispatchError {
    /// Status code returned to the client when no response head was sent yet.
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Response head from the upstream, with everything needed to relay the body.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub parts: response::Parts,
    pub body: Incoming,
    pub connection: PooledConnection,
    pub progress: Arc<UploadProgress>,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Arc<dyn ConnectionPool>,
    timeouts: Timeouts,
}

impl Dispatcher {
    pub fn new(pool: Arc<dyn ConnectionPool>, timeouts: Timeouts) -> Self {
        Self { pool, timeouts }
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Send `outbound` and wait for the response head, finishing by `deadline`.
    pub async fn dispatch(
        &self,
        outbound: OutboundRequest,
        deadline: Instant,
    ) -> Result<UpstreamResponse, DispatchError> {
        let OutboundRequest { key, request } = outbound;
        let (mut parts, body) = request.into_parts();
        parts.uri = origin_form(&parts.uri)?;
        let (body, progress) = UploadBody::new(body);
        let mut request = Request::from_parts(parts, body);

        let (mut connection, mut reused) = self.acquire(&key, deadline).await?;
        let response = loop {
            let upstream = connection
                .connection_mut()
                .ok_or_else(|| DispatchError::ConnectFailed("connection released".into()))?;
            tracing::debug!(connection_id = %upstream.id(), upstream = %key, reused, "Dispatching request");

            let send = upstream.sender().try_send_request(request);
            match self.await_head(send, &progress, deadline).await? {
                Ok(response) => break response,
                Err(mut err) => match err.take_message() {
                    Some(unsent) if reused => {
                        tracing::debug!(upstream = %key, error = %err.error(), "Pooled connection closed before use, reconnecting");
                        drop(connection);
                        request = unsent;
                        connection = self.connect(&key, deadline).await?;
                        reused = false;
                    }
                    _ => return Err(classify(err.error(), &progress)),
                },
            }
        };

        if progress.is_failed() {
            return Err(DispatchError::WriteFailed(
                "client request body failed".into(),
            ));
        }

        let (parts, body) = response.into_parts();
        Ok(UpstreamResponse {
            parts,
            body,
            connection,
            progress,
        })
    }

    /// Reuse an idle pooled connection if one is ready, else connect.
    async fn acquire(
        &self,
        key: &PoolKey,
        deadline: Instant,
    ) -> Result<(PooledConnection, bool), DispatchError> {
        while let Some(conn) = self.pool.checkout(key) {
            let mut pooled = PooledConnection::new(key.clone(), conn, Arc::clone(&self.pool));
            let Some(upstream) = pooled.connection_mut() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, upstream.ready()).await {
                Ok(Ok(())) => {
                    self.pool.counters().record_reused();
                    return Ok((pooled, true));
                }
                Ok(Err(e)) => {
                    tracing::debug!(upstream = %key, error = %e, "Pooled connection not usable");
                }
                Err(_) => return Err(DispatchError::Timeout(TimeoutKind::Exchange)),
            }
        }

        Ok((self.connect(key, deadline).await?, false))
    }

    async fn connect(
        &self,
        key: &PoolKey,
        deadline: Instant,
    ) -> Result<PooledConnection, DispatchError> {
        let conn =
            UpstreamConnection::connect(key, self.timeouts.connect_within(deadline)).await?;
        self.pool.counters().record_created();
        Ok(PooledConnection::new(
            key.clone(),
            conn,
            Arc::clone(&self.pool),
        ))
    }

    /// Drive `send` until the response head arrives, the upload stalls for
    /// longer than the idle limit, or the deadline passes.
    async fn await_head<F, T>(
        &self,
        send: F,
        progress: &UploadProgress,
        deadline: Instant,
    ) -> Result<T, DispatchError>
    where
        F: Future<Output = T>,
    {
        tokio::pin!(send);
        loop {
            let idle_at = progress.last_activity() + self.timeouts.idle;
            tokio::select! {
                result = &mut send => return Ok(result),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(DispatchError::Timeout(TimeoutKind::Exchange));
                }
                _ = tokio::time::sleep_until(idle_at) => {
                    // The upload may have progressed while we slept.
                    if progress.last_activity() + self.timeouts.idle <= Instant::now() {
                        return Err(DispatchError::Timeout(TimeoutKind::Idle));
                    }
                }
            }
        }
    }
}

fn origin_form(uri: &Uri) -> Result<Uri, DispatchError> {
    let path_and_query = uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    Uri::builder()
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| DispatchError::WriteFailed(format!("invalid request target: {e}")))
}

fn classify(err: &hyper::Error, progress: &UploadProgress) -> DispatchError {
    // Errors raised by the body we were sending, or while it was still in
    // flight, are write failures; parse errors mean the upstream answered.
    if progress.is_failed() || err.is_user() || (!progress.is_complete() && !err.is_parse()) {
        DispatchError::WriteFailed(err.to_string())
    } else {
        DispatchError::ReadFailed(err.to_string())
    }
}
