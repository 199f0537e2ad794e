//! Deferred server response.
//!
//! # Responsibilities
//! - Hold the status and headers the client will receive while filters run
//! - Commit exactly once; later writes are ignored
//! - Map gateway errors to plain-text error responses
//!
//! # Design Decisions
//! - The backend response is copied in but not written until commit, so
//!   post-processing filters can still amend status and headers
//! - Committing twice is a no-op, never an error

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};

use crate::error::GatewayError;

/// The response under construction for one exchange.
#[derive(Debug, Default)]
pub struct ServerResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Option<Body>,
    committed: bool,
}

impl ServerResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Returns false when the response is already committed.
    pub fn set_status(&mut self, status: StatusCode) -> bool {
        if self.committed {
            tracing::debug!(%status, "Ignoring status change on committed response");
            return false;
        }
        self.status = Some(status);
        true
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable headers, or `None` once committed.
    pub fn headers_mut(&mut self) -> Option<&mut HeaderMap> {
        if self.committed {
            None
        } else {
            Some(&mut self.headers)
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Restore status and headers captured before a forwarding attempt.
    pub fn reset(&mut self, status: Option<StatusCode>, headers: HeaderMap) -> bool {
        if self.committed {
            return false;
        }
        self.status = status;
        self.headers = headers;
        true
    }

    /// Freeze status and headers and attach the body.
    ///
    /// Returns false, and drops `body`, if the response was already committed.
    pub fn commit(&mut self, body: Body) -> bool {
        if self.committed {
            tracing::trace!("Response already committed");
            return false;
        }
        self.body = Some(body);
        self.committed = true;
        true
    }

    /// Commit a plain-text error response for `err`.
    pub fn commit_error(&mut self, err: &GatewayError) -> bool {
        if self.committed {
            return false;
        }
        let status = err.status();
        self.status = Some(status);
        self.headers.clear();
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        let reason = status.canonical_reason().unwrap_or("Gateway Error");
        self.commit(Body::from(reason))
    }

    /// Build the response handed to the server connection.
    pub fn into_http(self) -> Response<Body> {
        let mut response = Response::new(self.body.unwrap_or_else(Body::empty));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}
