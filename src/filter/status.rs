//! Status filters.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};

use crate::error::GatewayError;
use crate::filter::{FilterChain, GatewayFilter};
use crate::http::exchange::Exchange;

/// Overrides the status of a successful response.
#[derive(Debug)]
pub struct SetStatusFilter {
    status: StatusCode,
}

impl SetStatusFilter {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

#[async_trait]
impl GatewayFilter for SetStatusFilter {
    fn name(&self) -> &str {
        "SetStatus"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        chain.proceed(exchange).await?;
        exchange.response_mut().set_status(self.status);
        Ok(())
    }
}

/// Answers with a redirect without calling the backend.
#[derive(Debug)]
pub struct RedirectToFilter {
    status: StatusCode,
    location: HeaderValue,
}

impl RedirectToFilter {
    pub fn new(status: StatusCode, location: HeaderValue) -> Self {
        Self { status, location }
    }
}

#[async_trait]
impl GatewayFilter for RedirectToFilter {
    fn name(&self) -> &str {
        "RedirectTo"
    }

    async fn filter(&self, exchange: &mut Exchange, _chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let response = exchange.response_mut();
        response.set_status(self.status);
        if let Some(headers) = response.headers_mut() {
            headers.insert(header::LOCATION, self.location.clone());
        }
        response.commit(Body::empty());
        Ok(())
    }
}
