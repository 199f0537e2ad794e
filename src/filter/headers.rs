//! Request and response header filters.
//!
//! Request-side filters act before delegating. Response-side filters act
//! after the chain returns, on the deferred response, and only when the
//! chain succeeded and nothing has been committed yet.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::GatewayError;
use crate::filter::{FilterChain, GatewayFilter};
use crate::http::exchange::Exchange;
use crate::security::headers::{strip_hop_by_hop, SECURE_HEADER_DEFAULTS};

/// Apply `edit` to the response headers after a successful chain.
async fn after_response(
    exchange: &mut Exchange,
    chain: FilterChain<'_>,
    edit: impl FnOnce(&mut HeaderMap),
) -> Result<(), GatewayError> {
    chain.proceed(exchange).await?;
    if let Some(headers) = exchange.response_mut().headers_mut() {
        edit(headers);
    }
    Ok(())
}

#[derive(Debug)]
pub struct AddRequestHeaderFilter {
    name: HeaderName,
    value: HeaderValue,
}

impl AddRequestHeaderFilter {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

#[async_trait]
impl GatewayFilter for AddRequestHeaderFilter {
    fn name(&self) -> &str {
        "AddRequestHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        exchange
            .request_mut()
            .headers_mut()
            .append(self.name.clone(), self.value.clone());
        chain.proceed(exchange).await
    }
}

/// Appends `name=value` to the query string, form-encoded.
#[derive(Debug)]
pub struct AddRequestParameterFilter {
    encoded: String,
}

impl AddRequestParameterFilter {
    pub fn new(name: &str, value: &str) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(name, value)
            .finish();
        Self { encoded }
    }
}

#[async_trait]
impl GatewayFilter for AddRequestParameterFilter {
    fn name(&self) -> &str {
        "AddRequestParameter"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let query = match exchange.request().query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{}", self.encoded),
            _ => self.encoded.clone(),
        };
        exchange.request_mut().set_query(Some(&query))?;
        chain.proceed(exchange).await
    }
}

#[derive(Debug)]
pub struct RemoveRequestHeaderFilter {
    name: HeaderName,
}

impl RemoveRequestHeaderFilter {
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

#[async_trait]
impl GatewayFilter for RemoveRequestHeaderFilter {
    fn name(&self) -> &str {
        "RemoveRequestHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        exchange.request_mut().headers_mut().remove(&self.name);
        chain.proceed(exchange).await
    }
}

/// Strips connection-scoped headers from the inbound request.
#[derive(Debug)]
pub struct RemoveNonProxyHeadersFilter {
    headers: Option<Vec<HeaderName>>,
}

impl RemoveNonProxyHeadersFilter {
    /// `None` removes the standard hop-by-hop set.
    pub fn new(headers: Option<Vec<HeaderName>>) -> Self {
        Self { headers }
    }
}

#[async_trait]
impl GatewayFilter for RemoveNonProxyHeadersFilter {
    fn name(&self) -> &str {
        "RemoveNonProxyHeaders"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let request_headers = exchange.request_mut().headers_mut();
        match &self.headers {
            Some(names) => {
                for name in names {
                    request_headers.remove(name);
                }
            }
            None => strip_hop_by_hop(request_headers),
        }
        chain.proceed(exchange).await
    }
}

#[derive(Debug)]
pub struct AddResponseHeaderFilter {
    name: HeaderName,
    value: HeaderValue,
}

impl AddResponseHeaderFilter {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

#[async_trait]
impl GatewayFilter for AddResponseHeaderFilter {
    fn name(&self) -> &str {
        "AddResponseHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        after_response(exchange, chain, |headers| {
            headers.append(self.name.clone(), self.value.clone());
        })
        .await
    }
}

/// Replaces every value of a response header.
#[derive(Debug)]
pub struct SetResponseHeaderFilter {
    name: HeaderName,
    value: HeaderValue,
}

impl SetResponseHeaderFilter {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

#[async_trait]
impl GatewayFilter for SetResponseHeaderFilter {
    fn name(&self) -> &str {
        "SetResponseHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        after_response(exchange, chain, |headers| {
            headers.insert(self.name.clone(), self.value.clone());
        })
        .await
    }
}

#[derive(Debug)]
pub struct RemoveResponseHeaderFilter {
    name: HeaderName,
}

impl RemoveResponseHeaderFilter {
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

#[async_trait]
impl GatewayFilter for RemoveResponseHeaderFilter {
    fn name(&self) -> &str {
        "RemoveResponseHeader"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        after_response(exchange, chain, |headers| {
            headers.remove(&self.name);
        })
        .await
    }
}

/// Adds the standard security headers to every response.
#[derive(Debug)]
pub struct SecureHeadersFilter {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecureHeadersFilter {
    /// Headers named in `disable` (case-insensitive) are left out.
    pub fn new(disable: &[String]) -> Self {
        let headers = SECURE_HEADER_DEFAULTS
            .iter()
            .filter(|(name, _)| !disable.iter().any(|d| d.eq_ignore_ascii_case(name)))
            .map(|(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();
        Self { headers }
    }
}

#[async_trait]
impl GatewayFilter for SecureHeadersFilter {
    fn name(&self) -> &str {
        "SecureHeaders"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        after_response(exchange, chain, |response_headers| {
            for (name, value) in &self.headers {
                response_headers.insert(name.clone(), value.clone());
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::testing::{exchange, run};
    use crate::filter::OrderedFilter;
    use axum::body::Body;
    use axum::http::{header, Response, StatusCode};

    /// Stands in for forwarding: captures a fixed backend response.
    #[derive(Debug)]
    struct Backend;

    #[async_trait]
    impl GatewayFilter for Backend {
        fn name(&self) -> &str {
            "Backend"
        }

        async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
            let response = Response::builder()
                .status(StatusCode::OK)
                .header("x-backend", "1")
                .header("x-frame-options", "SAMEORIGIN")
                .body(Body::empty())
                .unwrap();
            exchange.capture_upstream(response);
            chain.proceed(exchange).await
        }
    }

    fn header(name: &'static str, value: &'static str) -> (HeaderName, HeaderValue) {
        (HeaderName::from_static(name), HeaderValue::from_static(value))
    }

    #[tokio::test]
    async fn request_headers_and_parameters() {
        let mut ex = exchange("/items?page=2");
        ex.request_mut()
            .headers_mut()
            .insert("x-internal", HeaderValue::from_static("secret"));
        let (name, value) = header("x-tenant", "acme");
        run(
            vec![
                OrderedFilter::new(1, AddRequestHeaderFilter::new(name, value)),
                OrderedFilter::new(2, AddRequestParameterFilter::new("q", "a b&c")),
                OrderedFilter::new(3, RemoveRequestHeaderFilter::new(HeaderName::from_static("x-internal"))),
            ],
            &mut ex,
        )
        .await
        .unwrap();
        assert_eq!(ex.request().headers()["x-tenant"], "acme");
        assert!(!ex.request().headers().contains_key("x-internal"));
        assert_eq!(ex.request().query(), Some("page=2&q=a+b%26c"));
    }

    #[tokio::test]
    async fn parameter_on_empty_query() {
        let mut ex = exchange("/items");
        run(vec![OrderedFilter::new(1, AddRequestParameterFilter::new("a", "1"))], &mut ex)
            .await
            .unwrap();
        assert_eq!(ex.request().uri().to_string(), "/items?a=1");
    }

    #[tokio::test]
    async fn non_proxy_headers_are_removed() {
        let mut ex = exchange("/");
        let headers = ex.request_mut().headers_mut();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        run(vec![OrderedFilter::new(1, RemoveNonProxyHeadersFilter::new(None))], &mut ex)
            .await
            .unwrap();
        assert_eq!(ex.request().headers().len(), 1);
    }

    #[tokio::test]
    async fn response_headers_are_edited_after_the_backend() {
        let mut ex = exchange("/");
        let (added, added_value) = header("x-added", "yes");
        let (set, set_value) = header("x-backend", "overridden");
        run(
            vec![
                OrderedFilter::new(1, AddResponseHeaderFilter::new(added, added_value)),
                OrderedFilter::new(2, SetResponseHeaderFilter::new(set, set_value)),
                OrderedFilter::new(3, RemoveResponseHeaderFilter::new(HeaderName::from_static("x-frame-options"))),
                OrderedFilter::new(4, Backend),
            ],
            &mut ex,
        )
        .await
        .unwrap();
        let headers = ex.response().headers();
        assert_eq!(headers["x-added"], "yes");
        assert_eq!(headers["x-backend"], "overridden");
        assert!(!headers.contains_key("x-frame-options"));
    }

    #[tokio::test]
    async fn secure_headers_respect_disable_list() {
        let mut ex = exchange("/");
        run(
            vec![
                OrderedFilter::new(1, SecureHeadersFilter::new(&["Content-Security-Policy".to_string()])),
                OrderedFilter::new(2, Backend),
            ],
            &mut ex,
        )
        .await
        .unwrap();
        let headers = ex.response().headers();
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["strict-transport-security"], "max-age=631138519");
        assert!(!headers.contains_key("content-security-policy"));
    }

    #[tokio::test]
    async fn committed_response_is_left_alone() {
        let mut ex = exchange("/");
        ex.response_mut().commit(Body::empty());
        run(vec![OrderedFilter::new(1, SecureHeadersFilter::new(&[]))], &mut ex)
            .await
            .unwrap();
        assert!(ex.response().headers().is_empty());
    }
}
