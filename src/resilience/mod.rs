//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Retry filter, after each forwarding attempt:
//!     → retries.rs (method allowed? status or error retryable? attempts left?)
//!     → backoff.rs (how long to wait before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Retries only for idempotent requests; others are refused when the
//!   route is compiled
//! - Backend deadlines live in the transport (`http::client`), not here

pub mod backoff;
pub mod retries;
