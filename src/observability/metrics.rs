//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_rate_limited_total` (counter): denied requests by route
//! - `gateway_upstream_retries_total` (counter): repeated forwarding attempts
//! - `gateway_route_refreshes_total` (counter): route cache rebuilds by outcome
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade and are no-ops until an
//!   exporter is installed
//! - Requests that matched no route are labelled `route="none"`

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, route: &str, elapsed: Duration) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_rate_limited(route: &str) {
    metrics::counter!("gateway_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_retry(route: &str, attempt: u32) {
    metrics::counter!(
        "gateway_upstream_retries_total",
        "route" => route.to_string(),
        "attempt" => attempt.to_string()
    )
    .increment(1);
}

pub fn record_route_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("gateway_route_refreshes_total", "outcome" => outcome).increment(1);
}
