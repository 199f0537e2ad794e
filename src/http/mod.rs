//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, fallback handler)
//!     → request.rs (request ID, GatewayRequest view of the inbound request)
//!     → exchange.rs (per-request context handed through the filter chain)
//!     → client.rs (backend call, used by the forwarding filter)
//!     → response.rs (deferred response, committed once)
//!     → Send to client
//! ```

pub mod client;
pub mod exchange;
pub mod request;
pub mod response;
pub mod server;

pub use exchange::Exchange;
pub use request::{GatewayRequest, RequestBody, X_REQUEST_ID};
pub use response::ServerResponse;
pub use server::HttpServer;
