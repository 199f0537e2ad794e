//! Caching route locator.
//!
//! # State
//! ```text
//! Valid(routes) ──invalidate──▶ Invalidated { stale } ──rebuild ok──▶ Valid(routes)
//!                                        │
//!                                        └─rebuild fails──▶ serve stale (if any)
//! ```
//!
//! # Design Decisions
//! - Reads of a valid snapshot are lock-free (`ArcSwap`)
//! - Rebuilds are serialised by an async mutex; callers that queued behind a
//!   rebuild find the fresh snapshot and return it without rebuilding again
//! - A rebuild installs its result with a compare-and-swap against the state
//!   it started from, so an invalidation that lands mid-rebuild is never
//!   overwritten by a snapshot taken before it
//! - No time-based expiry: only an explicit invalidation refreshes the routes

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::error::GatewayError;
use crate::observability::metrics;
use crate::route::locator::{RouteList, RouteLocator};

#[derive(Debug, Clone)]
enum CacheState {
    Valid(RouteList),
    Invalidated { stale: Option<RouteList> },
}

impl CacheState {
    fn snapshot(&self) -> Option<RouteList> {
        match self {
            CacheState::Valid(routes) => Some(routes.clone()),
            CacheState::Invalidated { stale } => stale.clone(),
        }
    }
}

#[derive(Debug)]
pub struct CachingRouteLocator {
    delegate: Arc<dyn RouteLocator>,
    state: ArcSwap<CacheState>,
    generation: AtomicU64,
    rebuild: Mutex<()>,
}

impl CachingRouteLocator {
    pub fn new(delegate: Arc<dyn RouteLocator>) -> Self {
        Self {
            delegate,
            state: ArcSwap::from_pointee(CacheState::Invalidated { stale: None }),
            generation: AtomicU64::new(0),
            rebuild: Mutex::new(()),
        }
    }

    /// Drop the current snapshot; the next read rebuilds it.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.rcu(|current| CacheState::Invalidated {
            stale: current.snapshot(),
        });
        tracing::debug!(generation, "Route cache invalidated");
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn rebuild(&self) -> Result<RouteList, GatewayError> {
        let _guard = self.rebuild.lock().await;
        let state = self.state.load_full();
        let stale = match state.as_ref() {
            CacheState::Valid(routes) => return Ok(routes.clone()),
            CacheState::Invalidated { stale } => stale.clone(),
        };

        let generation = self.generation();
        match self.delegate.routes().await {
            Ok(routes) => {
                metrics::record_route_refresh(true);
                // Any invalidation since `state` was loaded replaced the pointer.
                let previous = self
                    .state
                    .compare_and_swap(&state, Arc::new(CacheState::Valid(routes.clone())));
                if Arc::ptr_eq(&previous, &state) {
                    tracing::info!(count = routes.len(), generation, "Routes refreshed");
                } else {
                    self.state.rcu(|current| match current.as_ref() {
                        CacheState::Invalidated { .. } => CacheState::Invalidated {
                            stale: Some(routes.clone()),
                        },
                        valid => valid.clone(),
                    });
                    tracing::debug!(generation, "Routes changed during refresh, keeping cache invalid");
                }
                Ok(routes)
            }
            Err(err) => {
                metrics::record_route_refresh(false);
                match stale {
                    Some(routes) => {
                        tracing::warn!(error = %err, "Route refresh failed, serving previous routes");
                        Ok(routes)
                    }
                    None => {
                        tracing::error!(error = %err, "Route refresh failed");
                        Err(err)
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RouteLocator for CachingRouteLocator {
    async fn routes(&self) -> Result<RouteList, GatewayError> {
        let current = self.state.load_full();
        if let CacheState::Valid(routes) = current.as_ref() {
            return Ok(routes.clone());
        }
        self.rebuild().await
    }
}

/// Invalidate `cache` on every event received from `events`.
pub fn spawn_refresh_listener<T>(
    cache: Arc<CachingRouteLocator>,
    mut events: broadcast::Receiver<T>,
) -> JoinHandle<()>
where
    T: Clone + Send + std::fmt::Debug + 'static,
{
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::debug!(?event, "Refreshing routes");
                    cache.invalidate();
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Route events lagged, refreshing routes");
                    cache.invalidate();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
