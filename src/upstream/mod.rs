//! Upstream dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! OutboundRequest (absolute-form URI, PoolKey)
//!     → dispatch.rs (acquire connection, write request, await head)
//!         → pool.rs (checkout idle connection by scheme/host/port)
//!         → connection.rs (fresh TCP + HTTP/1.1 handshake on a miss)
//!         → body.rs (stream client body upstream, track progress)
//!     → UpstreamResponse (head + streaming body + connection on loan)
//!     → Relay decides: return connection to pool or discard it
//! ```
//!
//! # Design Decisions
//! - One connection per exchange; HTTP/1.1 upstreams are never multiplexed
//! - Plain HTTP only; TLS to upstreams is out of scope
//! - The pool sits behind a trait so tests can observe or disable it

pub mod body;
pub mod connection;
pub mod dispatch;
pub mod pool;

pub use body::{UploadBody, UploadProgress, UploadState};
pub use connection::UpstreamConnection;
pub use dispatch::{DispatchError, Dispatcher, UpstreamResponse};
pub use pool::{
    ConnectionPool, DisabledPool, PoolCounters, PoolKey, PoolStats, PooledConnection,
    UpstreamPool,
};
