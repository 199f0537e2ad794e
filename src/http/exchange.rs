//! Per-request exchange.
//!
//! # Responsibilities
//! - Own the inbound request and the deferred response for one request
//! - Carry the state filters hand to each other in typed slots
//!
//! # Design Decisions
//! - One slot per piece of state; reading an empty slot yields `None`,
//!   writing twice overwrites
//! - The backend body lives in the `upstream` slot until commit so it can
//!   be discarded when the attempt is retried

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode, Uri};

use crate::http::request::{GatewayRequest, X_REQUEST_ID};
use crate::http::response::ServerResponse;
use crate::route::Route;
use crate::routing::pattern::PathMatch;

/// Metadata and body of the backend response captured by forwarding.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

/// Context shared by every filter handling one request.
#[derive(Debug)]
pub struct Exchange {
    request: GatewayRequest,
    response: ServerResponse,
    request_id: String,
    started_at: Instant,
    route: Option<Arc<Route>>,
    request_url: Option<Uri>,
    original_urls: Vec<Uri>,
    path_match: Option<PathMatch>,
    upstream: Option<UpstreamResponse>,
}

impl Exchange {
    pub fn new(request: GatewayRequest) -> Self {
        let request_id = request
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            request,
            response: ServerResponse::new(),
            request_id,
            started_at: Instant::now(),
            route: None,
            request_url: None,
            original_urls: Vec::new(),
            path_match: None,
            upstream: None,
        }
    }

    pub fn from_http(request: Request<Body>, remote_addr: Option<SocketAddr>) -> Self {
        Self::new(GatewayRequest::from_http(request, remote_addr))
    }

    pub fn request(&self) -> &GatewayRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut GatewayRequest {
        &mut self.request
    }

    pub fn response(&self) -> &ServerResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ServerResponse {
        &mut self.response
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    pub fn set_route(&mut self, route: Arc<Route>) {
        self.route = Some(route);
    }

    /// Id of the matched route, if any.
    pub fn route_id(&self) -> Option<&str> {
        self.route.as_deref().map(Route::id)
    }

    pub fn request_url(&self) -> Option<&Uri> {
        self.request_url.as_ref()
    }

    pub fn set_request_url(&mut self, url: Uri) {
        self.request_url = Some(url);
    }

    /// URLs the request had before each rewrite, oldest first.
    pub fn original_urls(&self) -> &[Uri] {
        &self.original_urls
    }

    /// Record the current request URI before a filter rewrites it.
    pub fn record_original_url(&mut self) {
        let uri = self.request.uri().clone();
        if !self.original_urls.contains(&uri) {
            self.original_urls.push(uri);
        }
    }

    pub fn path_match(&self) -> Option<&PathMatch> {
        self.path_match.as_ref()
    }

    pub fn set_path_match(&mut self, path_match: Option<PathMatch>) {
        self.path_match = path_match;
    }

    pub fn upstream(&self) -> Option<&UpstreamResponse> {
        self.upstream.as_ref()
    }

    /// Store the backend response and copy its status and headers into the
    /// deferred response without committing it.
    pub fn capture_upstream(&mut self, response: Response<Body>) {
        let (parts, body) = response.into_parts();
        self.response.set_status(parts.status);
        if let Some(headers) = self.response.headers_mut() {
            for (name, value) in parts.headers.iter() {
                headers.append(name.clone(), value.clone());
            }
        }
        self.upstream = Some(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body: Some(body),
        });
    }

    pub fn take_upstream_body(&mut self) -> Option<Body> {
        self.upstream.as_mut().and_then(|u| u.body.take())
    }

    /// Drop a captured backend response, closing its body.
    pub fn clear_upstream(&mut self) {
        self.upstream = None;
    }

    /// Consume the exchange, producing the response for the client.
    pub fn into_response(self) -> Response<Body> {
        self.response.into_http()
    }
}
