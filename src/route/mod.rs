//! Route model and route sources.
//!
//! # Data Flow
//! ```text
//! Route sources (config file, in-memory repository)
//!     → CompositeRouteDefinitionLocator (concatenate in registration order)
//!     → RouteDefinitionRouteLocator (compile, refuse invalid definitions)
//!     → CachingRouteLocator (one materialisation per generation)
//!     → GatewayHandler
//! ```
//!
//! # Design Decisions
//! - A compiled [`Route`] is immutable and shared as `Arc<Route>`
//! - Default filters are compiled into every route ahead of its own filters,
//!   so they take the low positions in the chain

pub mod caching;
pub mod definition;
pub mod locator;
pub mod repository;

use axum::http::Uri;

use crate::filter::factory::{compile_filters, FilterContext};
use crate::filter::OrderedFilter;
use crate::http::request::GatewayRequest;
use crate::routing::matcher::{AllOf, MatchContext, RoutePredicate};
use definition::{DefinitionError, FilterDefinition, RouteDefinition};

pub use caching::CachingRouteLocator;
pub use locator::{
    CompositeRouteDefinitionLocator, CompositeRouteLocator, PropertiesRouteDefinitionLocator,
    RouteDefinitionLocator, RouteDefinitionRouteLocator, RouteList, RouteLocator,
};
pub use repository::{InMemoryRouteDefinitionRepository, RouteDefinitionWriter, RouteEvent};

/// An executable route.
#[derive(Debug)]
pub struct Route {
    id: String,
    uri: Uri,
    order: i32,
    predicate: AllOf,
    filters: Vec<OrderedFilter>,
}

impl Route {
    pub fn builder(id: impl Into<String>, uri: Uri) -> RouteBuilder {
        RouteBuilder {
            id: id.into(),
            uri,
            order: 0,
            predicates: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn filters(&self) -> &[OrderedFilter] {
        &self.filters
    }

    pub fn matches(&self, request: &GatewayRequest, ctx: &mut MatchContext) -> bool {
        self.predicate.matches(request, ctx)
    }
}

#[derive(Debug)]
pub struct RouteBuilder {
    id: String,
    uri: Uri,
    order: i32,
    predicates: Vec<Box<dyn RoutePredicate>>,
    filters: Vec<OrderedFilter>,
}

impl RouteBuilder {
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn predicate(mut self, predicate: impl RoutePredicate + 'static) -> Self {
        self.predicates.push(Box::new(predicate));
        self
    }

    pub fn filter(mut self, filter: OrderedFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(self) -> Route {
        Route {
            id: self.id,
            uri: self.uri,
            order: self.order,
            predicate: AllOf::new(self.predicates),
            filters: self.filters,
        }
    }
}

/// Turns definitions into routes.
#[derive(Debug, Clone)]
pub struct RouteCompiler {
    ctx: FilterContext,
    default_filters: Vec<FilterDefinition>,
}

impl RouteCompiler {
    pub fn new(ctx: FilterContext, default_filters: Vec<FilterDefinition>) -> Self {
        Self { ctx, default_filters }
    }

    pub fn compile(&self, definition: &RouteDefinition) -> Result<Route, DefinitionError> {
        if definition.id.trim().is_empty() {
            return Err(DefinitionError::MissingId);
        }
        self.compile_inner(definition)
            .map_err(|e| e.in_route(&definition.id))
    }

    fn compile_inner(&self, definition: &RouteDefinition) -> Result<Route, DefinitionError> {
        let uri = parse_route_uri(&definition.uri)?;
        let predicate = AllOf::compile(&definition.predicates)?;
        let definitions: Vec<FilterDefinition> = self
            .default_filters
            .iter()
            .chain(&definition.filters)
            .cloned()
            .collect();
        let filters = compile_filters(&definitions, &self.ctx)?;
        Ok(Route {
            id: definition.id.clone(),
            uri,
            order: definition.order,
            predicate,
            filters,
        })
    }
}

/// A route URI must name at least a scheme and an authority.
pub fn parse_route_uri(raw: &str) -> Result<Uri, DefinitionError> {
    let invalid = |reason: &str| DefinitionError::InvalidUri {
        uri: raw.to_string(),
        reason: reason.to_string(),
    };
    let uri: Uri = raw.trim().parse().map_err(|e: axum::http::uri::InvalidUri| invalid(&e.to_string()))?;
    if uri.scheme().is_none() {
        return Err(invalid("missing scheme"));
    }
    if uri.authority().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::testing::context;
    use crate::route::definition::PredicateDefinition;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;

    fn compiler(defaults: &[&str]) -> RouteCompiler {
        RouteCompiler::new(
            context(),
            defaults.iter().map(|d| d.parse().unwrap()).collect(),
        )
    }

    #[test]
    fn compiles_predicates_and_filters() {
        let def = RouteDefinition::new("users", "http://backend:8080")
            .with_order(3)
            .with_predicate("Path=/users/**".parse().unwrap())
            .with_filter("PrefixPath=/api".parse().unwrap());
        let route = compiler(&[]).compile(&def).unwrap();
        assert_eq!(route.id(), "users");
        assert_eq!(route.order(), 3);
        assert_eq!(route.uri().host(), Some("backend"));
        assert_eq!(route.filters().len(), 1);

        let request = GatewayRequest::from_http(
            Request::get("/users/7").body(Body::empty()).unwrap(),
            None,
        );
        let mut ctx = MatchContext::new(Utc::now());
        assert!(route.matches(&request, &mut ctx));
        assert!(ctx.path_match.is_some());
    }

    #[test]
    fn default_filters_come_first() {
        let def = RouteDefinition::new("r", "http://backend")
            .with_filter("AddRequestHeader=X-Route,r".parse().unwrap());
        let route = compiler(&["AddRequestHeader=X-Default,d"]).compile(&def).unwrap();
        let orders: Vec<i32> = route.filters().iter().map(|f| f.order).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[test]
    fn rejects_bad_definitions_with_route_context() {
        let bad_uri = RouteDefinition::new("r1", "/relative");
        let err = compiler(&[]).compile(&bad_uri).unwrap_err();
        assert!(err.to_string().starts_with("route r1:"), "{err}");

        let unknown = RouteDefinition::new("r2", "http://backend")
            .with_predicate(PredicateDefinition::new("Weekday"));
        assert!(matches!(
            compiler(&[]).compile(&unknown),
            Err(DefinitionError::InRoute { ref route_id, .. }) if route_id == "r2"
        ));

        assert_eq!(
            compiler(&[]).compile(&RouteDefinition::new(" ", "http://backend")).unwrap_err(),
            DefinitionError::MissingId
        );
    }

    #[test]
    fn lb_uris_are_accepted() {
        assert_eq!(parse_route_uri("lb://users").unwrap().scheme_str(), Some("lb"));
        assert!(parse_route_uri("backend:8080/x").is_err());
    }
}
