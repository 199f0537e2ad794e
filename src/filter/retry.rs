//! Retry filter.
//!
//! # Data Flow
//! ```text
//! materialise request body (bounded) → snapshot request + response baseline
//!     loop:
//!         chain.proceed (route-to-url, forwarding, ...)
//!         committed?                → stop
//!         policy says retry?        → no: return this outcome
//!         restore baseline, drop captured backend response, back off
//! ```
//!
//! # Design Decisions
//! - Bodies are buffered up front so every attempt sends the same bytes
//! - Filters between this one and forwarding run once per attempt against
//!   the restored baseline, so rewrites are not applied twice

use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::filter::{FilterChain, GatewayFilter};
use crate::http::exchange::Exchange;
use crate::observability::metrics;
use crate::resilience::retries::RetryPolicy;

#[derive(Debug)]
pub struct RetryFilter {
    policy: RetryPolicy,
    body_limit: usize,
}

impl RetryFilter {
    pub fn new(policy: RetryPolicy, body_limit: usize) -> Self {
        Self { policy, body_limit }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl GatewayFilter for RetryFilter {
    fn name(&self) -> &str {
        "Retry"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let method = exchange.request().method().clone();
        if !self.policy.allows_method(&method) || self.policy.max_attempts <= 1 {
            return chain.proceed(exchange).await;
        }

        exchange
            .request_mut()
            .body_mut()
            .materialize(self.body_limit)
            .await?;
        let request_uri = exchange.request().uri().clone();
        let request_headers = exchange.request().headers().clone();
        let status = exchange.response().status();
        let response_headers = exchange.response().headers().clone();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = chain.proceed(exchange).await;
            if exchange.response().is_committed() {
                return outcome;
            }
            let captured = exchange.upstream().map(|u| u.status);
            if !self.policy.should_retry(attempt, &method, &outcome, captured) {
                return outcome;
            }

            let route_id = exchange.route_id().unwrap_or("none").to_string();
            match &outcome {
                Ok(()) => tracing::info!(
                    request_id = exchange.request_id(),
                    route_id = %route_id,
                    attempt,
                    status = captured.map(|s| s.as_u16()),
                    "Retrying request"
                ),
                Err(err) => tracing::info!(
                    request_id = exchange.request_id(),
                    route_id = %route_id,
                    attempt,
                    error = %err,
                    "Retrying after upstream error"
                ),
            }
            metrics::record_retry(&route_id, attempt);

            exchange.clear_upstream();
            exchange.response_mut().reset(status, response_headers.clone());
            exchange.request_mut().set_uri(request_uri.clone());
            *exchange.request_mut().headers_mut() = request_headers.clone();

            let delay = self
                .policy
                .backoff
                .as_ref()
                .map_or(Duration::ZERO, |backoff| backoff.delay(attempt));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
