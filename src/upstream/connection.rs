//! A single HTTP/1.1 connection to an upstream.
//!
//! # Responsibilities
//! - Open the TCP connection within the connect timeout
//! - Run the HTTP/1.1 handshake and drive the connection on its own task
//! - Report readiness and idle age for pool decisions

use axum::http::uri::Scheme;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::net::ConnectionId;
use crate::resilience::TimeoutKind;
use crate::upstream::body::UploadBody;
use crate::upstream::dispatch::DispatchError;
use crate::upstream::pool::PoolKey;

/// An open connection, either in use or parked in the pool.
#[derive(Debug)]
pub struct UpstreamConnection {
    id: ConnectionId,
    sender: SendRequest<UploadBody>,
    last_used: Instant,
}

impl UpstreamConnection {
    /// Connect to `key`, giving up after `connect_timeout`.
    pub async fn connect(key: &PoolKey, connect_timeout: Duration) -> Result<Self, DispatchError> {
        if key.scheme != Scheme::HTTP {
            return Err(DispatchError::ConnectFailed(format!(
                "unsupported upstream scheme {}",
                key.scheme
            )));
        }

        let addr = (key.host.as_str(), key.port);
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(DispatchError::ConnectFailed(format!("{key}: {e}")));
            }
            Err(_) => return Err(DispatchError::Timeout(TimeoutKind::Connect)),
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(upstream = %key, error = %e, "Failed to set TCP_NODELAY");
        }

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| DispatchError::ConnectFailed(format!("{key}: handshake failed: {e}")))?;

        let id = ConnectionId::new();
        let upstream = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(connection_id = %id, upstream = %upstream, error = %e, "Upstream connection closed with error");
            }
        });

        tracing::debug!(connection_id = %id, upstream = %key, "Upstream connection established");

        Ok(Self {
            id,
            sender,
            last_used: Instant::now(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait until the connection can take another request.
    pub async fn ready(&mut self) -> Result<(), hyper::Error> {
        self.sender.ready().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn sender(&mut self) -> &mut SendRequest<UploadBody> {
        &mut self.sender
    }

    /// Mark the connection as just used.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Time since the connection was last used.
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}
