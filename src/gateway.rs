//! Gateway assembly.
//!
//! # Data Flow
//! ```text
//! GatewayConfig
//!     → PropertiesRouteDefinitionLocator (config routes)  ┐
//!     → InMemoryRouteDefinitionRepository (runtime routes) ├─ CompositeRouteDefinitionLocator
//!     → extra sources (builder)                            ┘
//!     → RouteDefinitionRouteLocator (compile with default filters)
//!     → CachingRouteLocator (invalidated by repository events and reloads)
//!     → GatewayHandler (+ ResponseCommit, RouteToRequestUrl, ProxyForwarding)
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Response;
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::filter::factory::FilterContext;
use crate::filter::{
    OrderedFilter, ProxyForwardingFilter, ResponseCommitFilter, RouteToRequestUrlFilter, ServiceResolver,
    FORWARDING_ORDER, RESPONSE_COMMIT_ORDER, ROUTE_TO_URL_ORDER,
};
use crate::http::client::{BackendTransport, HyperTransport};
use crate::http::exchange::Exchange;
use crate::route::caching::spawn_refresh_listener;
use crate::route::{
    CachingRouteLocator, CompositeRouteDefinitionLocator, InMemoryRouteDefinitionRepository,
    PropertiesRouteDefinitionLocator, RouteCompiler, RouteDefinitionLocator, RouteDefinitionRouteLocator,
    RouteList, RouteLocator,
};
use crate::routing::router::GatewayHandler;
use crate::security::rate_limit::{RateLimiter, TokenBucketRateLimiter};

pub struct GatewayBuilder {
    config: GatewayConfig,
    transport: Option<Arc<dyn BackendTransport>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    service_resolver: Option<Arc<dyn ServiceResolver>>,
    sources: Vec<Arc<dyn RouteDefinitionLocator>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            transport: None,
            rate_limiter: None,
            service_resolver: None,
            sources: Vec::new(),
        }
    }

    /// Replace the default hyper client.
    pub fn transport(mut self, transport: Arc<dyn BackendTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the in-process token bucket limiter.
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Resolve `lb://service` route URIs.
    pub fn service_resolver(mut self, resolver: Arc<dyn ServiceResolver>) -> Self {
        self.service_resolver = Some(resolver);
        self
    }

    /// Add a route source after the configured routes and the repository.
    pub fn route_source(mut self, source: Arc<dyn RouteDefinitionLocator>) -> Self {
        self.sources.push(source);
        self
    }

    /// Assemble the pipeline. Must be called inside a Tokio runtime.
    pub fn build(self) -> Gateway {
        let config = self.config;
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(HyperTransport::new(
                Duration::from_secs(config.timeouts.connect_secs),
                Duration::from_secs(config.timeouts.upstream_secs),
            ))
        });
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(TokenBucketRateLimiter::in_memory()));
        let body_limit = config.limits.max_body_bytes;

        let properties = Arc::new(PropertiesRouteDefinitionLocator::new(config.routes.clone()));
        let repository = Arc::new(InMemoryRouteDefinitionRepository::new());
        let mut sources: Vec<Arc<dyn RouteDefinitionLocator>> = vec![properties.clone(), repository.clone()];
        sources.extend(self.sources);

        let compiler = RouteCompiler::new(
            FilterContext {
                rate_limiter,
                body_limit,
            },
            config.default_filters.clone(),
        );
        let compiled = RouteDefinitionRouteLocator::new(
            Arc::new(CompositeRouteDefinitionLocator::new(sources)),
            compiler,
        );
        let cache = Arc::new(CachingRouteLocator::new(Arc::new(compiled)));
        let listener = spawn_refresh_listener(cache.clone(), repository.subscribe());

        let global_filters = vec![
            OrderedFilter::new(RESPONSE_COMMIT_ORDER, ResponseCommitFilter),
            OrderedFilter::new(ROUTE_TO_URL_ORDER, RouteToRequestUrlFilter::new(self.service_resolver)),
            OrderedFilter::new(FORWARDING_ORDER, ProxyForwardingFilter::new(transport, body_limit)),
        ];
        let handler = GatewayHandler::new(cache.clone(), global_filters);

        Gateway {
            handler,
            properties,
            repository,
            cache,
            listener,
        }
    }
}

/// A fully wired request pipeline.
#[derive(Debug)]
pub struct Gateway {
    handler: GatewayHandler,
    properties: Arc<PropertiesRouteDefinitionLocator>,
    repository: Arc<InMemoryRouteDefinitionRepository>,
    cache: Arc<CachingRouteLocator>,
    listener: JoinHandle<()>,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn handler(&self) -> &GatewayHandler {
        &self.handler
    }

    /// Routes currently served, in evaluation order.
    pub async fn routes(&self) -> Result<RouteList, GatewayError> {
        self.cache.routes().await
    }

    /// Runtime route store; changes invalidate the route cache.
    pub fn repository(&self) -> Arc<InMemoryRouteDefinitionRepository> {
        self.repository.clone()
    }

    /// Force the next request to rebuild the route list.
    pub fn refresh_routes(&self) {
        self.cache.invalidate();
    }

    /// Swap in the routes of a reloaded configuration.
    pub fn apply_config(&self, config: &GatewayConfig) {
        self.properties.replace(config.routes.clone());
        self.cache.invalidate();
    }

    pub async fn handle(&self, exchange: Exchange) -> Response<Body> {
        self.handler.handle(exchange).await
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::forward::tests::Recording;
    use crate::route::definition::RouteDefinition;
    use crate::route::RouteDefinitionWriter;
    use axum::http::{Request, StatusCode};

    fn gateway(routes: Vec<RouteDefinition>) -> (Gateway, Arc<Recording>) {
        let transport = Arc::new(Recording::default());
        let config = GatewayConfig {
            routes,
            ..GatewayConfig::default()
        };
        let gateway = Gateway::builder(config).transport(transport.clone()).build();
        (gateway, transport)
    }

    fn exchange(uri: &str) -> Exchange {
        Exchange::from_http(Request::get(uri).body(Body::empty()).unwrap(), Some("10.1.1.1:5000".parse().unwrap()))
    }

    #[tokio::test]
    async fn prefix_path_reaches_the_backend() {
        let (gateway, transport) = gateway(vec![RouteDefinition::new("r", "http://backend")
            .with_predicate("Path=/foo/**".parse().unwrap())
            .with_filter("PrefixPath=/prefixed".parse().unwrap())]);

        let response = gateway.handle(exchange("/foo/bar")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].1, "http://backend/prefixed/foo/bar");
    }

    #[tokio::test]
    async fn repository_changes_are_served() {
        let (gateway, _) = gateway(Vec::new());
        assert_eq!(gateway.handle(exchange("/new")).await.status(), StatusCode::NOT_FOUND);

        gateway
            .repository()
            .save(RouteDefinition::new("new", "http://backend").with_predicate("Path=/new".parse().unwrap()))
            .await
            .unwrap();
        // The listener invalidates asynchronously.
        for _ in 0..100 {
            if gateway.routes().await.unwrap().len() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(gateway.handle(exchange("/new")).await.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn reload_replaces_config_routes() {
        let (gateway, _) = gateway(vec![RouteDefinition::new("old", "http://backend")]);
        assert_eq!(gateway.routes().await.unwrap()[0].id(), "old");

        let reloaded = GatewayConfig {
            routes: vec![RouteDefinition::new("new", "http://backend")],
            ..GatewayConfig::default()
        };
        gateway.apply_config(&reloaded);
        assert_eq!(gateway.routes().await.unwrap()[0].id(), "new");
    }
}
