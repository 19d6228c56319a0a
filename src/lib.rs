//! Forwarding HTTP proxy engine.
//!
//! Accepts HTTP/1.1 requests, resolves each to an upstream, forwards it over
//! a pooled connection and streams the response back.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod proxy;
pub mod routing;
pub mod upstream;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{ForwardingEngine, ForwardingOutcome};
