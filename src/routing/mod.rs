//! Routing subsystem: target resolution.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, target, host, path)
//!     → Resolver (pluggable)
//!         - forward.rs: absolute-form target or Host header
//!         - router.rs: route table lookup via matcher.rs
//!     → Return: ResolvedTarget or ResolutionError
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by priority
//!     → Compile matchers
//!     → Freeze as immutable RouteResolver
//! ```
//!
//! # Design Decisions
//! - Resolvers are pure with respect to the forwarding engine
//! - Deterministic: same input always resolves to the same target
//! - Multi-upstream selection belongs in a Resolver, not in the engine

pub mod forward;
pub mod matcher;
pub mod router;
pub mod target;

use std::sync::Arc;

use crate::config::{RoutingConfig, RoutingMode};

pub use forward::ForwardResolver;
pub use router::RouteResolver;
pub use target::{PathRewrite, ResolutionError, ResolvedTarget, Resolver};

/// Build the resolver selected by configuration.
pub fn from_config(config: &RoutingConfig) -> Arc<dyn Resolver> {
    match config.mode {
        RoutingMode::Forward => Arc::new(ForwardResolver::new()),
        RoutingMode::Routes => Arc::new(RouteResolver::from_config(&config.routes)),
    }
}
