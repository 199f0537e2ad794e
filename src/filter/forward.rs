//! Proxy forwarding.
//!
//! # Data Flow
//! ```text
//! request_url slot (set by RouteToRequestUrl)
//!     → outbound request: method, headers minus hop-by-hop, X-Forwarded-*
//!     → body: streamed, or re-encoded when form-urlencoded
//!     → BackendTransport::send (exactly one call)
//!     → status + headers copied into the deferred response, body kept in
//!       the upstream slot
//!     → rest of the chain
//! ```
//!
//! Nothing is written to the client here; the response commit filter does
//! that once the chain has unwound.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request};
use bytes::Bytes;

use crate::error::GatewayError;
use crate::filter::{FilterChain, GatewayFilter};
use crate::http::client::BackendTransport;
use crate::http::exchange::Exchange;
use crate::security::headers::{add_forwarded_headers, strip_hop_by_hop};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

pub struct ProxyForwardingFilter {
    transport: Arc<dyn BackendTransport>,
    body_limit: usize,
}

impl std::fmt::Debug for ProxyForwardingFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyForwardingFilter")
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

impl ProxyForwardingFilter {
    pub fn new(transport: Arc<dyn BackendTransport>, body_limit: usize) -> Self {
        Self {
            transport,
            body_limit,
        }
    }

    async fn outbound_body(&self, exchange: &mut Exchange) -> Result<Body, GatewayError> {
        let is_form = exchange
            .request()
            .content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with(FORM_URLENCODED));
        if !is_form {
            return exchange.request_mut().body_mut().take();
        }

        let raw = exchange.request_mut().body_mut().materialize(self.body_limit).await?;
        let encoded = reencode_form(&raw);
        let length = HeaderValue::from(encoded.len());
        exchange
            .request_mut()
            .headers_mut()
            .insert(header::CONTENT_LENGTH, length);
        Ok(Body::from(encoded))
    }
}

/// Decode and re-encode every field of a form body.
pub fn reencode_form(raw: &[u8]) -> Bytes {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in url::form_urlencoded::parse(raw) {
        serializer.append_pair(&name, &value);
    }
    Bytes::from(serializer.finish())
}

#[async_trait]
impl GatewayFilter for ProxyForwardingFilter {
    fn name(&self) -> &str {
        "ProxyForwarding"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let url = exchange
            .request_url()
            .cloned()
            .ok_or(GatewayError::MissingState("request url"))?;
        let body = self.outbound_body(exchange).await?;

        let outbound = {
            let request = exchange.request();
            let mut headers = request.headers().clone();
            strip_hop_by_hop(&mut headers);
            let host = headers.remove(header::HOST);
            add_forwarded_headers(&mut headers, request.remote_addr(), host.as_ref());

            let mut outbound = Request::builder()
                .method(request.method().clone())
                .uri(url.clone())
                .body(body)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
            *outbound.headers_mut() = headers;
            outbound
        };

        tracing::debug!(
            request_id = exchange.request_id(),
            method = %outbound.method(),
            url = %url,
            "Forwarding request"
        );
        let mut response = self.transport.send(outbound).await?;
        strip_hop_by_hop(response.headers_mut());
        tracing::debug!(
            request_id = exchange.request_id(),
            status = response.status().as_u16(),
            "Backend responded"
        );

        exchange.capture_upstream(response);
        chain.proceed(exchange).await
    }
}
