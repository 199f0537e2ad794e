//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Fetch the current routes and pick the first one whose predicates match
//! - Build the filter chain for the matched route and run it
//! - Return an explicit no-match (404) without invoking any filter
//!
//! # Design Decisions
//! - Routes are fetched before the exchange is borrowed for matching, since
//!   the exchange cannot be shared across an await point
//! - The winning route's path captures are moved into the exchange; captures
//!   from routes that failed later predicates are discarded

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use chrono::Utc;

use crate::error::GatewayError;
use crate::filter::{merge_filters, FilterChain, OrderedFilter};
use crate::http::exchange::Exchange;
use crate::observability::metrics;
use crate::route::{Route, RouteList, RouteLocator};
use crate::routing::matcher::MatchContext;

/// Entry point of the request pipeline.
#[derive(Debug, Clone)]
pub struct GatewayHandler {
    locator: Arc<dyn RouteLocator>,
    global_filters: Arc<Vec<OrderedFilter>>,
}

impl GatewayHandler {
    pub fn new(locator: Arc<dyn RouteLocator>, global_filters: Vec<OrderedFilter>) -> Self {
        Self {
            locator,
            global_filters: Arc::new(global_filters),
        }
    }

    /// First route, in order, whose predicates all match; records path captures.
    pub fn match_route(routes: &RouteList, exchange: &mut Exchange) -> Option<Arc<Route>> {
        let now = Utc::now();
        for route in routes.iter() {
            let mut ctx = MatchContext::new(now);
            if route.matches(exchange.request(), &mut ctx) {
                exchange.set_path_match(ctx.path_match);
                return Some(route.clone());
            }
        }
        None
    }

    /// Fetch the current routes and match `exchange` against them.
    pub async fn lookup_route(&self, exchange: &mut Exchange) -> Result<Option<Arc<Route>>, GatewayError> {
        let routes = self.locator.routes().await?;
        Ok(Self::match_route(&routes, exchange))
    }

    /// Global filters merged with the route's own, in execution order.
    pub fn filter_chain(&self, route: &Route) -> Vec<OrderedFilter> {
        merge_filters(&self.global_filters, route.filters())
    }

    /// Run one exchange through the pipeline and produce the client response.
    pub async fn handle(&self, mut exchange: Exchange) -> Response<Body> {
        let method = exchange.request().method().to_string();

        let route = match self.lookup_route(&mut exchange).await {
            Ok(Some(route)) => route,
            Ok(None) => {
                tracing::debug!(
                    request_id = exchange.request_id(),
                    method = %method,
                    path = exchange.request().path(),
                    "No route matched"
                );
                metrics::record_request(&method, 404, "none", exchange.elapsed());
                return plain(StatusCode::NOT_FOUND);
            }
            Err(err) => {
                tracing::error!(request_id = exchange.request_id(), error = %err, "Route lookup failed");
                let status = err.status();
                metrics::record_request(&method, status.as_u16(), "none", exchange.elapsed());
                return plain(status);
            }
        };

        tracing::debug!(
            request_id = exchange.request_id(),
            route_id = route.id(),
            method = %method,
            path = exchange.request().path(),
            "Route matched"
        );
        let filters = self.filter_chain(&route);
        exchange.set_route(route.clone());

        let outcome = FilterChain::new(&filters).proceed(&mut exchange).await;
        if !exchange.response().is_committed() {
            // Only reachable when the chain has no commit filter.
            match outcome {
                Ok(()) => {
                    let body = exchange.take_upstream_body().unwrap_or_else(Body::empty);
                    exchange.response_mut().commit(body);
                }
                Err(err) => {
                    tracing::error!(request_id = exchange.request_id(), route_id = route.id(), error = %err, "Request failed");
                    exchange.response_mut().commit_error(&err);
                }
            }
        } else if let Err(err) = outcome {
            tracing::debug!(request_id = exchange.request_id(), error = %err, "Error after commit");
        }

        let elapsed = exchange.elapsed();
        let response = exchange.into_response();
        metrics::record_request(&method, response.status().as_u16(), route.id(), elapsed);
        tracing::info!(
            route_id = route.id(),
            method = %method,
            status = response.status().as_u16(),
            latency_ms = elapsed.as_millis() as u64,
            "Request completed"
        );
        response
    }
}

fn plain(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::from(status.canonical_reason().unwrap_or_default()));
    *response.status_mut() = status;
    response
}
