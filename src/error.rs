//! Gateway error taxonomy.
//!
//! Every failure that can reach the filter chain is a [`GatewayError`]. The
//! response commit stage turns it into a status code via
//! [`GatewayError::status`]; filters that can recover (retry) inspect
//! [`GatewayError::is_upstream`].

use std::time::Duration;

use axum::http::StatusCode;

use crate::route::definition::DefinitionError;

/// Boxed error coming from a transport or storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while matching, filtering or forwarding a request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A route, predicate or filter definition could not be compiled.
    #[error("configuration error: {0}")]
    Definition(#[from] DefinitionError),

    /// The backend could not be reached or failed mid-response.
    #[error("upstream request to {url} failed: {source}")]
    Upstream {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The backend did not answer within the configured deadline.
    #[error("upstream request to {url} timed out after {timeout:?}")]
    UpstreamTimeout { url: String, timeout: Duration },

    /// A filter ran without the state an earlier filter should have produced.
    #[error("missing exchange state: {0}")]
    MissingState(&'static str),

    /// The request body had to be buffered and exceeded the limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The request body stream failed while being read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// A `lb://` route URI named a service nobody could resolve.
    #[error("no instance available for service {0}")]
    NoInstance(String),

    /// A route source could not produce its definitions.
    #[error("route source failed: {0}")]
    RouteSource(String),

    /// A route repository was asked to remove a route it does not hold.
    #[error("route {0} not found")]
    RouteNotFound(String),

    /// The rate limiter storage failed.
    #[error("rate limiter failed: {0}")]
    RateLimiter(String),

    /// The inbound request cannot be rewritten into a valid URI.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Status code written to the client when this error reaches the commit stage.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Definition(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::MissingState(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoInstance(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RouteSource(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimiter(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// True for failures of the backend call itself (eligible for retry).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            GatewayError::Upstream { .. } | GatewayError::UpstreamTimeout { .. }
        )
    }
}
