//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming exchange
//!     → router.rs (fetch routes, first match wins)
//!     → matcher.rs (AND of the route's predicates)
//!     → predicates.rs (path, host, method, header, cookie, query,
//!                      remote address, time)
//!     → pattern.rs (segment patterns for paths and hosts)
//!     → matched route + filter chain, or NoMatch (404)
//! ```
//!
//! # Design Decisions
//! - Predicates compiled once per route, immutable at runtime
//! - Regexes are anchored and compiled at load time, never per request
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod pattern;
pub mod predicates;
pub mod router;

pub use router::GatewayHandler;
