//! Retry policy.
//!
//! # Responsibilities
//! - Decide whether a forwarding outcome is worth another attempt
//! - Bound the number of attempts
//!
//! # Design Decisions
//! - Only idempotent methods may be retried; anything else is rejected when
//!   the route is loaded, since the request body may not be replayable
//! - Transport failures are retryable unless `retry_on_error` is off
//! - Status classes and individual statuses are both configurable

use axum::http::{Method, StatusCode};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::resilience::backoff::BackoffConfig;

/// Class of HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSeries {
    Informational,
    Successful,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusSeries {
    pub fn of(status: StatusCode) -> Option<Self> {
        match status.as_u16() / 100 {
            1 => Some(StatusSeries::Informational),
            2 => Some(StatusSeries::Successful),
            3 => Some(StatusSeries::Redirection),
            4 => Some(StatusSeries::ClientError),
            5 => Some(StatusSeries::ServerError),
            _ => None,
        }
    }
}

/// Compiled retry settings for one route.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub methods: Vec<Method>,
    pub series: Vec<StatusSeries>,
    pub statuses: Vec<StatusCode>,
    pub retry_on_error: bool,
    pub backoff: Option<BackoffConfig>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            methods: vec![Method::GET],
            series: vec![StatusSeries::ServerError],
            statuses: Vec::new(),
            retry_on_error: true,
            backoff: None,
        }
    }
}

impl RetryPolicy {
    /// True when `method` may be sent more than once without side effects.
    pub fn is_idempotent(method: &Method) -> bool {
        method.is_idempotent()
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.statuses.contains(&status)
            || StatusSeries::of(status).is_some_and(|s| self.series.contains(&s))
    }

    /// Decide whether the attempt that produced `outcome` should be repeated.
    ///
    /// `status` is the captured backend status when the attempt succeeded.
    pub fn should_retry(
        &self,
        attempt: u32,
        method: &Method,
        outcome: &Result<(), GatewayError>,
        status: Option<StatusCode>,
    ) -> bool {
        if attempt >= self.max_attempts || !self.allows_method(method) {
            return false;
        }
        match outcome {
            Err(err) => self.retry_on_error && err.is_upstream(),
            Ok(()) => status.is_some_and(|s| self.is_retryable_status(s)),
        }
    }
}
