//! Forwarding engine subsystem.
//!
//! # Data Flow
//! ```text
//! Request<Body> + peer address
//!     → engine.rs
//!         → routing::Resolver            (Received → Resolved)
//!         → http::request::translate     (Resolved → Translated)
//!         → upstream::Dispatcher         (Translated → Dispatching)
//!         → http::response::relay        (Dispatching → Relaying)
//!     → lifecycle.rs reaches Done(outcome) when the body ends, fails, or is dropped
//!     → outcome.rs ForwardingOutcome → LogSink
//! ```
//!
//! # Design Decisions
//! - Exactly one outcome per request, enforced by the lifecycle's transition
//!   function and its drop guard
//! - No retries: a single forwarding attempt per inbound request

pub mod engine;
pub mod lifecycle;
pub mod outcome;

pub use engine::ForwardingEngine;
pub use lifecycle::{RequestLifecycle, Stage, TransitionError};
pub use outcome::ForwardingOutcome;
