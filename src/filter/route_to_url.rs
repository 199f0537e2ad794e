//! Backend URL resolution.
//!
//! Combines the scheme and authority of the matched route's URI with the
//! (possibly rewritten) path and query of the request. Routes whose URI uses
//! the `lb` scheme name a logical service; a [`ServiceResolver`] turns it into
//! a concrete base URI.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::uri::{Parts, PathAndQuery};
use axum::http::Uri;

use crate::error::GatewayError;
use crate::filter::{FilterChain, GatewayFilter};
use crate::http::exchange::Exchange;

/// Scheme marking a route URI as a logical service name.
pub const LB_SCHEME: &str = "lb";

/// Maps a logical service name onto a base URI (scheme and authority).
#[async_trait]
pub trait ServiceResolver: Send + Sync + fmt::Debug {
    async fn resolve(&self, service: &str) -> Option<Uri>;
}

#[derive(Debug, Default)]
pub struct RouteToRequestUrlFilter {
    resolver: Option<Arc<dyn ServiceResolver>>,
}

impl RouteToRequestUrlFilter {
    pub fn new(resolver: Option<Arc<dyn ServiceResolver>>) -> Self {
        Self { resolver }
    }

    async fn base_uri(&self, route_uri: &Uri) -> Result<Uri, GatewayError> {
        if route_uri.scheme_str() != Some(LB_SCHEME) {
            return Ok(route_uri.clone());
        }
        let service = route_uri.host().unwrap_or_default().to_string();
        let resolved = match &self.resolver {
            Some(resolver) => resolver.resolve(&service).await,
            None => None,
        };
        resolved.ok_or(GatewayError::NoInstance(service))
    }
}

/// `base`'s scheme and authority with `request`'s path and query.
pub fn merge_uri(base: &Uri, request: &Uri) -> Result<Uri, GatewayError> {
    let mut parts = Parts::default();
    parts.scheme = base.scheme().cloned();
    parts.authority = base.authority().cloned();
    parts.path_and_query = Some(
        request
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/")),
    );
    Uri::from_parts(parts).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl GatewayFilter for RouteToRequestUrlFilter {
    fn name(&self) -> &str {
        "RouteToRequestUrl"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let route = exchange.route().cloned().ok_or(GatewayError::MissingState("route"))?;
        let base = self.base_uri(route.uri()).await?;
        let url = merge_uri(&base, exchange.request().uri())?;
        tracing::debug!(route_id = route.id(), url = %url, "Resolved request url");
        exchange.set_request_url(url);
        chain.proceed(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::testing::{exchange, run};
    use crate::filter::OrderedFilter;
    use crate::route::Route;

    #[derive(Debug)]
    struct Fixed;

    #[async_trait]
    impl ServiceResolver for Fixed {
        async fn resolve(&self, service: &str) -> Option<Uri> {
            (service == "users").then(|| Uri::from_static("http://10.0.0.5:8080"))
        }
    }

    fn route(uri: &str) -> Arc<Route> {
        Arc::new(Route::builder("r1", uri.parse().unwrap()).build())
    }

    #[tokio::test]
    async fn merges_route_authority_with_request_path() {
        let mut ex = exchange("/foo/bar?x=1");
        ex.set_route(route("http://backend:9000/ignored"));
        run(vec![OrderedFilter::new(1, RouteToRequestUrlFilter::default())], &mut ex)
            .await
            .unwrap();
        assert_eq!(ex.request_url().unwrap().to_string(), "http://backend:9000/foo/bar?x=1");
    }

    #[tokio::test]
    async fn lb_uris_go_through_the_resolver() {
        let filter = RouteToRequestUrlFilter::new(Some(Arc::new(Fixed)));
        let mut ex = exchange("/a");
        ex.set_route(route("lb://users"));
        run(vec![OrderedFilter::new(1, filter)], &mut ex).await.unwrap();
        assert_eq!(ex.request_url().unwrap().to_string(), "http://10.0.0.5:8080/a");

        let filter = RouteToRequestUrlFilter::new(Some(Arc::new(Fixed)));
        let mut ex = exchange("/a");
        ex.set_route(route("lb://orders"));
        let err = run(vec![OrderedFilter::new(1, filter)], &mut ex).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoInstance(ref s) if s == "orders"));
    }

    #[tokio::test]
    async fn missing_route_is_internal_error() {
        let mut ex = exchange("/a");
        let err = run(vec![OrderedFilter::new(1, RouteToRequestUrlFilter::default())], &mut ex)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingState("route")));
    }
}
