//! Response commit.
//!
//! The outermost filter. It lets the rest of the chain run, including every
//! post-processing step, and then writes the deferred response exactly once:
//! the captured backend body on success, a plain error body on failure.
//! Filters that already committed (redirects, rate limit denials) win.

use async_trait::async_trait;
use axum::body::Body;

use crate::error::GatewayError;
use crate::filter::{FilterChain, GatewayFilter};
use crate::http::exchange::Exchange;

#[derive(Debug, Default)]
pub struct ResponseCommitFilter;

#[async_trait]
impl GatewayFilter for ResponseCommitFilter {
    fn name(&self) -> &str {
        "ResponseCommit"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let outcome = chain.proceed(exchange).await;
        if exchange.response().is_committed() {
            if let Err(err) = &outcome {
                tracing::debug!(request_id = exchange.request_id(), error = %err, "Error after commit");
            }
            return Ok(());
        }

        match outcome {
            Ok(()) => {
                let body = exchange.take_upstream_body().unwrap_or_else(Body::empty);
                exchange.response_mut().commit(body);
            }
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!(
                        request_id = exchange.request_id(),
                        route_id = exchange.route_id().unwrap_or("none"),
                        status = status.as_u16(),
                        error = %err,
                        "Request failed"
                    );
                } else {
                    tracing::warn!(
                        request_id = exchange.request_id(),
                        status = status.as_u16(),
                        error = %err,
                        "Request rejected"
                    );
                }
                exchange.clear_upstream();
                exchange.response_mut().commit_error(&err);
            }
        }
        Ok(())
    }
}
