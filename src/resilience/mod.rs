//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (connect, idle and exchange limits)
//!     → On expiry: exchange aborted, connection discarded
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream exchange has a deadline
//! - No retries: one forwarding attempt per inbound request

pub mod timeouts;

pub use timeouts::{TimeoutKind, Timeouts};
