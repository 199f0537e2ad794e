//! Inbound request handling.
//!
//! # Responsibilities
//! - Assign a request ID (UUID v4) as early as possible
//! - Expose routing-relevant parts (host, path, query, cookies, peer address)
//! - Let filters rewrite the path, query and headers before forwarding
//! - Track whether the body can still be sent (streamed bodies go out once)

use std::net::SocketAddr;

use axum::body::{Body, HttpBody};
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderMap, HeaderName, Method, Request, Uri, Version};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::error::GatewayError;

/// Header carrying the request ID, set on the way in and echoed on the way out.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer assigning a UUID request ID when the client did not send one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer copying the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// State of the inbound request body.
#[derive(Debug, Default)]
pub enum RequestBody {
    /// No body was sent.
    #[default]
    Empty,
    /// Body held in memory; can be sent any number of times.
    Buffered(Bytes),
    /// Single-use stream, not yet sent.
    Streaming(Body),
    /// The stream has been handed to a backend call.
    Consumed,
}

impl RequestBody {
    pub fn from_body(body: Body) -> Self {
        if body.is_end_stream() || body.size_hint().exact() == Some(0) {
            RequestBody::Empty
        } else {
            RequestBody::Streaming(body)
        }
    }

    /// True when the body can be sent again on a later attempt.
    pub fn is_replayable(&self) -> bool {
        matches!(self, RequestBody::Empty | RequestBody::Buffered(_))
    }

    /// Body for one outbound call. Streams are moved out and cannot be taken twice.
    pub fn take(&mut self) -> Result<Body, GatewayError> {
        match self {
            RequestBody::Empty => Ok(Body::empty()),
            RequestBody::Buffered(bytes) => Ok(Body::from(bytes.clone())),
            RequestBody::Streaming(_) => match std::mem::replace(self, RequestBody::Consumed) {
                RequestBody::Streaming(body) => Ok(body),
                _ => unreachable!("checked above"),
            },
            RequestBody::Consumed => Err(GatewayError::MissingState("request body already sent")),
        }
    }

    /// Read a streaming body into memory so it can be replayed.
    pub async fn materialize(&mut self, limit: usize) -> Result<Bytes, GatewayError> {
        match std::mem::replace(self, RequestBody::Consumed) {
            RequestBody::Empty => {
                *self = RequestBody::Empty;
                Ok(Bytes::new())
            }
            RequestBody::Buffered(bytes) => {
                *self = RequestBody::Buffered(bytes.clone());
                Ok(bytes)
            }
            RequestBody::Streaming(body) => {
                let collected = Limited::new(body, limit).collect().await.map_err(|e| {
                    if e.downcast_ref::<LengthLimitError>().is_some() {
                        GatewayError::BodyTooLarge { limit }
                    } else {
                        GatewayError::BodyRead(e.to_string())
                    }
                })?;
                let bytes = collected.to_bytes();
                *self = RequestBody::Buffered(bytes.clone());
                Ok(bytes)
            }
            RequestBody::Consumed => Err(GatewayError::MissingState("request body already sent")),
        }
    }
}

/// The inbound request as seen and rewritten by filters.
#[derive(Debug)]
pub struct GatewayRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: RequestBody,
    remote_addr: Option<SocketAddr>,
}

impl GatewayRequest {
    pub fn from_http(request: Request<Body>, remote_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body: RequestBody::from_body(body),
            remote_addr,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Decoded query parameters in request order.
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Host the client addressed, lowercased and without port.
    pub fn host(&self) -> Option<String> {
        let raw = self
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| self.uri.host())?;
        let host = if raw.starts_with('[') {
            // IPv6 literal: keep the brackets' content only
            raw.split(']').next().map(|h| h.trim_start_matches('['))?
        } else {
            raw.split(':').next()?
        };
        Some(host.to_ascii_lowercase())
    }

    /// Cookies from every `Cookie` header, as `(name, value)` pairs.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Replace the whole URI, e.g. to restore an earlier snapshot.
    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    /// Replace the path, keeping the query string.
    pub fn set_path(&mut self, path: &str) -> Result<(), GatewayError> {
        let path_and_query = match self.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };
        self.set_path_and_query(&path_and_query)
    }

    /// Replace the raw query string, keeping the path.
    pub fn set_query(&mut self, query: Option<&str>) -> Result<(), GatewayError> {
        let path_and_query = match query {
            Some(query) if !query.is_empty() => format!("{}?{}", self.uri.path(), query),
            _ => self.uri.path().to_string(),
        };
        self.set_path_and_query(&path_and_query)
    }

    fn set_path_and_query(&mut self, path_and_query: &str) -> Result<(), GatewayError> {
        let path_and_query = PathAndQuery::try_from(path_and_query)
            .map_err(|e| GatewayError::InvalidRequest(format!("{path_and_query}: {e}")))?;
        let mut parts = self.uri.clone().into_parts();
        parts.path_and_query = Some(path_and_query);
        self.uri = Uri::from_parts(parts).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> GatewayRequest {
        let req = Request::builder()
            .uri(uri)
            .header("Host", "API.Example.com:8080")
            .header("Cookie", "session=abc; theme=dark")
            .body(Body::empty())
            .unwrap();
        GatewayRequest::from_http(req, None)
    }

    #[test]
    fn host_is_lowercased_without_port() {
        assert_eq!(request("/").host().as_deref(), Some("api.example.com"));
    }

    #[test]
    fn cookies_are_split() {
        let cookies = request("/").cookies();
        assert_eq!(cookies[0], ("session".to_string(), "abc".to_string()));
        assert_eq!(cookies[1], ("theme".to_string(), "dark".to_string()));
    }

    #[test]
    fn set_path_keeps_query() {
        let mut req = request("/foo/bar?x=1&y=two%20words");
        req.set_path("/prefixed/foo/bar").unwrap();
        assert_eq!(req.uri().to_string(), "/prefixed/foo/bar?x=1&y=two%20words");
        assert_eq!(req.query_params()[1], ("y".to_string(), "two words".to_string()));
    }

    #[test]
    fn empty_body_is_recognised() {
        let req = request("/");
        assert!(matches!(req.body(), RequestBody::Empty));
        assert!(req.body().is_replayable());
    }

    #[tokio::test]
    async fn streaming_body_is_taken_once() {
        let mut body = RequestBody::Streaming(Body::from_stream(futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"abc")),
        ])));
        assert!(!body.is_replayable());
        assert!(body.take().is_ok());
        assert!(matches!(body.take(), Err(GatewayError::MissingState(_))));
    }

    #[tokio::test]
    async fn materialize_enforces_limit() {
        let mut body = RequestBody::Streaming(Body::from_stream(futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"0123456789")),
        ])));
        let err = body.materialize(4).await.unwrap_err();
        assert!(matches!(err, GatewayError::BodyTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn materialized_body_is_replayable() {
        let mut body = RequestBody::Streaming(Body::from_stream(futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"hello")),
        ])));
        let bytes = body.materialize(1024).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
        assert!(body.is_replayable());
        assert!(body.take().is_ok());
        assert!(body.take().is_ok());
    }
}
