//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, Axum router, request ID + trace layers)
//!     → request.rs (InboundRequest; translate to OutboundRequest)
//!         → headers.rs (hop-by-hop stripping, Forwarded/X-Forwarded-*/Via)
//!     → [forwarding engine dispatches upstream]
//!     → response.rs (strip hop-by-hop, stream body, decide connection reuse)
//!     → Send to client
//! ```

pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{translate, InboundRequest, OutboundRequest, X_REQUEST_ID};
pub use response::{error_response, relay, RelayBody, RelayError};
pub use server::HttpServer;
