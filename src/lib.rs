//! Route-matching HTTP API gateway.
//!
//! Requests are matched against an ordered, hot-swappable set of routes; the
//! matched route's filters run together with the global ones as one chain
//! that ends in a single backend call. The response is committed once the
//! chain has unwound, so filters can still amend it after the backend answered.

// Core subsystems
pub mod config;
pub mod filter;
pub mod gateway;
pub mod http;
pub mod route;
pub mod routing;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayBuilder};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
