//! In-memory route definition repository.
//!
//! Routes saved here are served next to the configured ones. Every change is
//! announced on a broadcast channel so the route cache can be invalidated.

use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::GatewayError;
use crate::route::definition::RouteDefinition;
use crate::route::locator::RouteDefinitionLocator;

const EVENT_CAPACITY: usize = 64;

/// A change to the set of stored routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    Saved(String),
    Deleted(String),
}

#[async_trait]
pub trait RouteDefinitionWriter: Send + Sync {
    /// Insert a route, or replace the stored route with the same id.
    async fn save(&self, definition: RouteDefinition) -> Result<(), GatewayError>;

    async fn delete(&self, id: &str) -> Result<(), GatewayError>;
}

#[derive(Debug)]
pub struct InMemoryRouteDefinitionRepository {
    routes: RwLock<Vec<RouteDefinition>>,
    events: broadcast::Sender<RouteEvent>,
}

impl InMemoryRouteDefinitionRepository {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            routes: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Receive a [`RouteEvent`] for every later change.
    pub fn subscribe(&self) -> broadcast::Receiver<RouteEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: RouteEvent) {
        tracing::debug!(?event, "Route repository changed");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for InMemoryRouteDefinitionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouteDefinitionWriter for InMemoryRouteDefinitionRepository {
    async fn save(&self, definition: RouteDefinition) -> Result<(), GatewayError> {
        if definition.id.trim().is_empty() {
            return Err(crate::route::definition::DefinitionError::MissingId.into());
        }
        let id = definition.id.clone();
        {
            let mut routes = self
                .routes
                .write()
                .map_err(|_| GatewayError::RouteSource("route repository lock poisoned".into()))?;
            match routes.iter_mut().find(|r| r.id == id) {
                Some(existing) => *existing = definition,
                None => routes.push(definition),
            }
        }
        self.notify(RouteEvent::Saved(id));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        {
            let mut routes = self
                .routes
                .write()
                .map_err(|_| GatewayError::RouteSource("route repository lock poisoned".into()))?;
            let before = routes.len();
            routes.retain(|r| r.id != id);
            if routes.len() == before {
                return Err(GatewayError::RouteNotFound(id.to_string()));
            }
        }
        self.notify(RouteEvent::Deleted(id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl RouteDefinitionLocator for InMemoryRouteDefinitionRepository {
    async fn route_definitions(&self) -> Result<Vec<RouteDefinition>, GatewayError> {
        self.routes
            .read()
            .map(|routes| routes.clone())
            .map_err(|_| GatewayError::RouteSource("route repository lock poisoned".into()))
    }
}
