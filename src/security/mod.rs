//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! RequestRateLimiter filter:
//!     → key_resolver.rs (who is this request counted against)
//!     → rate_limit.rs (token bucket per route + key)
//!
//! Forwarding and header filters:
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*, secure defaults)
//! ```
//!
//! # Design Decisions
//! - Bucket state sits behind a storage trait; the in-process store is a
//!   sharded map
//! - Limiter failures fail open, logged by the filter

pub mod headers;
pub mod key_resolver;
pub mod rate_limit;
