//! Route locators.
//!
//! Definition locators produce raw [`RouteDefinition`]s; route locators
//! produce compiled, ordered [`Route`]s. Both are async because a source may
//! live behind I/O.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::error::GatewayError;
use crate::route::definition::RouteDefinition;
use crate::route::{Route, RouteCompiler};

/// An ordered, shared snapshot of compiled routes.
pub type RouteList = Arc<Vec<Arc<Route>>>;

#[async_trait]
pub trait RouteDefinitionLocator: Send + Sync + fmt::Debug {
    async fn route_definitions(&self) -> Result<Vec<RouteDefinition>, GatewayError>;
}

#[async_trait]
pub trait RouteLocator: Send + Sync + fmt::Debug {
    async fn routes(&self) -> Result<RouteList, GatewayError>;
}

/// Routes declared in the configuration file, swapped whole on reload.
#[derive(Debug, Default)]
pub struct PropertiesRouteDefinitionLocator {
    definitions: ArcSwap<Vec<RouteDefinition>>,
}

impl PropertiesRouteDefinitionLocator {
    pub fn new(definitions: Vec<RouteDefinition>) -> Self {
        Self {
            definitions: ArcSwap::from_pointee(definitions),
        }
    }

    pub fn replace(&self, definitions: Vec<RouteDefinition>) {
        tracing::info!(count = definitions.len(), "Replacing configured routes");
        self.definitions.store(Arc::new(definitions));
    }
}

#[async_trait]
impl RouteDefinitionLocator for PropertiesRouteDefinitionLocator {
    async fn route_definitions(&self) -> Result<Vec<RouteDefinition>, GatewayError> {
        Ok(self.definitions.load().as_ref().clone())
    }
}

/// Concatenates several sources in registration order.
#[derive(Debug, Default)]
pub struct CompositeRouteDefinitionLocator {
    sources: Vec<Arc<dyn RouteDefinitionLocator>>,
}

impl CompositeRouteDefinitionLocator {
    pub fn new(sources: Vec<Arc<dyn RouteDefinitionLocator>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl RouteDefinitionLocator for CompositeRouteDefinitionLocator {
    async fn route_definitions(&self) -> Result<Vec<RouteDefinition>, GatewayError> {
        let mut all = Vec::new();
        for source in &self.sources {
            all.extend(source.route_definitions().await?);
        }
        Ok(all)
    }
}

/// Compiles definitions into routes.
///
/// A definition that fails to compile is logged and left out; the other
/// routes are still served.
#[derive(Debug)]
pub struct RouteDefinitionRouteLocator {
    definitions: Arc<dyn RouteDefinitionLocator>,
    compiler: RouteCompiler,
}

impl RouteDefinitionRouteLocator {
    pub fn new(definitions: Arc<dyn RouteDefinitionLocator>, compiler: RouteCompiler) -> Self {
        Self {
            definitions,
            compiler,
        }
    }
}

#[async_trait]
impl RouteLocator for RouteDefinitionRouteLocator {
    async fn routes(&self) -> Result<RouteList, GatewayError> {
        let definitions = self.definitions.route_definitions().await?;
        let mut routes = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            match self.compiler.compile(definition) {
                Ok(route) => routes.push(Arc::new(route)),
                Err(err) => {
                    tracing::error!(route_id = %definition.id, error = %err, "Refusing invalid route")
                }
            }
        }
        routes.sort_by_key(|r| r.order());
        tracing::debug!(count = routes.len(), "Compiled routes");
        Ok(Arc::new(routes))
    }
}

/// Merges several route locators into one ordered list.
#[derive(Debug, Default)]
pub struct CompositeRouteLocator {
    locators: Vec<Arc<dyn RouteLocator>>,
}

impl CompositeRouteLocator {
    pub fn new(locators: Vec<Arc<dyn RouteLocator>>) -> Self {
        Self { locators }
    }
}

#[async_trait]
impl RouteLocator for CompositeRouteLocator {
    async fn routes(&self) -> Result<RouteList, GatewayError> {
        let mut merged = Vec::new();
        for locator in &self.locators {
            merged.extend(locator.routes().await?.iter().cloned());
        }
        merged.sort_by_key(|r| r.order());
        Ok(Arc::new(merged))
    }
}
