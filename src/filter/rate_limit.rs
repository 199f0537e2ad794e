//! Request rate limiting filter.
//!
//! Buckets are scoped per route: the limiter key is `<route id>:<resolved key>`.
//! A limiter failure lets the request through; losing the limiter must not
//! take the gateway down with it.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::error::GatewayError;
use crate::filter::{FilterChain, GatewayFilter};
use crate::http::exchange::Exchange;
use crate::observability::metrics;
use crate::security::key_resolver::KeyResolver;
use crate::security::rate_limit::{RateLimitResponse, RateLimiter};

pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const REPLENISH_RATE_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-replenish-rate");
pub const BURST_CAPACITY_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-burst-capacity");

#[derive(Debug)]
pub struct RequestRateLimiterFilter {
    limiter: Arc<dyn RateLimiter>,
    resolver: Arc<dyn KeyResolver>,
    replenish_rate: u32,
    burst_capacity: u32,
    deny_empty_key: bool,
}

impl RequestRateLimiterFilter {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        resolver: Arc<dyn KeyResolver>,
        replenish_rate: u32,
        burst_capacity: u32,
        deny_empty_key: bool,
    ) -> Self {
        Self {
            limiter,
            resolver,
            replenish_rate,
            burst_capacity,
            deny_empty_key,
        }
    }

    fn add_headers(&self, headers: &mut HeaderMap, result: &RateLimitResponse) {
        headers.insert(REMAINING_HEADER, HeaderValue::from(result.tokens_remaining.max(0)));
        headers.insert(REPLENISH_RATE_HEADER, HeaderValue::from(self.replenish_rate));
        headers.insert(BURST_CAPACITY_HEADER, HeaderValue::from(self.burst_capacity));
    }
}

#[async_trait]
impl GatewayFilter for RequestRateLimiterFilter {
    fn name(&self) -> &str {
        "RequestRateLimiter"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let route_id = exchange.route_id().unwrap_or("none").to_string();
        let Some(key) = self.resolver.resolve(exchange).await else {
            if !self.deny_empty_key {
                return chain.proceed(exchange).await;
            }
            tracing::warn!(
                request_id = exchange.request_id(),
                route_id = %route_id,
                "No rate limit key, denying"
            );
            exchange.response_mut().set_status(StatusCode::FORBIDDEN);
            exchange.response_mut().commit(Body::empty());
            return Ok(());
        };

        let bucket = format!("{route_id}:{key}");
        let result = match self
            .limiter
            .is_allowed(&bucket, self.replenish_rate, self.burst_capacity)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(route_id = %route_id, error = %err, "Rate limiter unavailable, allowing request");
                return chain.proceed(exchange).await;
            }
        };

        if let Some(headers) = exchange.response_mut().headers_mut() {
            self.add_headers(headers, &result);
        }
        if result.allowed {
            return chain.proceed(exchange).await;
        }

        tracing::warn!(
            request_id = exchange.request_id(),
            route_id = %route_id,
            key = %key,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(&route_id);
        exchange.response_mut().set_status(StatusCode::TOO_MANY_REQUESTS);
        exchange.response_mut().commit(Body::empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::testing::{exchange, run, Recorder};
    use crate::filter::OrderedFilter;
    use crate::security::key_resolver::{HeaderKeyResolver, RemoteAddrKeyResolver};
    use crate::security::rate_limit::TokenBucketRateLimiter;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl RateLimiter for Broken {
        async fn is_allowed(&self, _: &str, _: u32, _: u32) -> Result<RateLimitResponse, GatewayError> {
            Err(GatewayError::RateLimiter("store offline".into()))
        }
    }

    /// Resolves after a lookup delay, like a token introspection call.
    #[derive(Debug)]
    struct Introspecting;

    #[async_trait]
    impl KeyResolver for Introspecting {
        async fn resolve(&self, exchange: &mut Exchange) -> Option<String> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            exchange
                .request()
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(|token| format!("subject-of-{token}"))
        }
    }

    fn filter(limiter: Arc<dyn RateLimiter>, resolver: Arc<dyn KeyResolver>, deny_empty_key: bool) -> RequestRateLimiterFilter {
        RequestRateLimiterFilter::new(limiter, resolver, 10, 20, deny_empty_key)
    }

    #[tokio::test(start_paused = true)]
    async fn denies_once_the_burst_is_spent() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(TokenBucketRateLimiter::in_memory());
        let log = Arc::new(Mutex::new(Vec::new()));
        let filters = vec![
            OrderedFilter::new(1, filter(limiter, Arc::new(RemoteAddrKeyResolver), true)),
            OrderedFilter::new(2, Recorder { tag: "backend", log: log.clone() }),
        ];

        for _ in 0..20 {
            let mut ex = exchange("/");
            FilterChain::new(&filters).proceed(&mut ex).await.unwrap();
            assert!(!ex.response().is_committed());
        }
        let mut ex = exchange("/");
        FilterChain::new(&filters).proceed(&mut ex).await.unwrap();
        assert!(ex.response().is_committed());
        let response = ex.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[REMAINING_HEADER], "0");
        assert_eq!(response.headers()[BURST_CAPACITY_HEADER], "20");
        assert_eq!(log.lock().unwrap().len(), 40);
    }

    #[tokio::test]
    async fn missing_key_is_forbidden_unless_allowed() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(TokenBucketRateLimiter::in_memory());
        let resolver: Arc<dyn KeyResolver> = Arc::new(HeaderKeyResolver::new(HeaderName::from_static("x-api-key")));

        let mut ex = exchange("/");
        run(vec![OrderedFilter::new(1, filter(limiter.clone(), resolver.clone(), true))], &mut ex)
            .await
            .unwrap();
        assert_eq!(ex.into_response().status(), StatusCode::FORBIDDEN);

        let mut ex = exchange("/");
        run(vec![OrderedFilter::new(1, filter(limiter, resolver, false))], &mut ex)
            .await
            .unwrap();
        assert!(!ex.response().is_committed());
    }

    #[tokio::test]
    async fn limiter_errors_fail_open() {
        let mut ex = exchange("/");
        run(
            vec![OrderedFilter::new(1, filter(Arc::new(Broken), Arc::new(RemoteAddrKeyResolver), true))],
            &mut ex,
        )
        .await
        .unwrap();
        assert!(!ex.response().is_committed());
        assert!(!ex.response().headers().contains_key(REMAINING_HEADER));
    }

    #[tokio::test(start_paused = true)]
    async fn async_resolver_is_awaited_before_limiting() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(TokenBucketRateLimiter::in_memory());
        let filters = vec![OrderedFilter::new(
            1,
            RequestRateLimiterFilter::new(limiter, Arc::new(Introspecting), 1, 1, true),
        )];
        let request = |token: Option<&str>| {
            let mut builder = axum::http::Request::builder().uri("/");
            if let Some(token) = token {
                builder = builder.header("authorization", token);
            }
            Exchange::from_http(builder.body(Body::empty()).unwrap(), None)
        };

        let mut first = request(Some("abc"));
        FilterChain::new(&filters).proceed(&mut first).await.unwrap();
        assert!(!first.response().is_committed());
        assert_eq!(first.response().headers()[REMAINING_HEADER], "0");

        let mut second = request(Some("abc"));
        FilterChain::new(&filters).proceed(&mut second).await.unwrap();
        assert_eq!(second.into_response().status(), StatusCode::TOO_MANY_REQUESTS);

        let mut anonymous = request(None);
        FilterChain::new(&filters).proceed(&mut anonymous).await.unwrap();
        assert_eq!(anonymous.into_response().status(), StatusCode::FORBIDDEN);
    }
}
