//! Filter chain engine.
//!
//! # Data Flow
//! ```text
//! GatewayHandler
//!     → global filters + route filters, stable-sorted by order
//!     → FilterChain::proceed (index 0)
//!         → filter N acts, then calls chain.proceed (index N+1)
//!         ← post-processing runs as the calls unwind
//! ```
//!
//! Orders used by the built-in global filters:
//!
//! ```text
//! -1          ResponseCommit      wraps everything, commits last
//! 1..=n       route filters       by position unless an order is given
//! 10000       RouteToRequestUrl   resolves the backend URL
//! i32::MAX    ProxyForwarding     calls the backend
//! ```
//!
//! # Design Decisions
//! - The chain is a slice plus an index; it is `Copy`, so a filter can call
//!   `proceed` more than once (retry) and never observes partial state
//! - A filter short-circuits by returning without calling `proceed`

pub mod commit;
pub mod factory;
pub mod forward;
pub mod headers;
pub mod path;
pub mod rate_limit;
pub mod retry;
pub mod route_to_url;
pub mod status;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::http::exchange::Exchange;

pub use commit::ResponseCommitFilter;
pub use factory::{FilterContext, FilterSpec};
pub use forward::ProxyForwardingFilter;
pub use route_to_url::{RouteToRequestUrlFilter, ServiceResolver};

/// Order of the response commit filter.
pub const RESPONSE_COMMIT_ORDER: i32 = -1;
/// Order of the filter resolving the backend URL.
pub const ROUTE_TO_URL_ORDER: i32 = 10000;
/// Order of the forwarding filter.
pub const FORWARDING_ORDER: i32 = i32::MAX;

/// One step of request processing.
#[async_trait]
pub trait GatewayFilter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Act on the exchange, delegating to `chain` unless short-circuiting.
    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError>;
}

/// A filter with its position in the chain.
#[derive(Debug, Clone)]
pub struct OrderedFilter {
    pub order: i32,
    pub filter: Arc<dyn GatewayFilter>,
}

impl OrderedFilter {
    pub fn new(order: i32, filter: impl GatewayFilter + 'static) -> Self {
        Self {
            order,
            filter: Arc::new(filter),
        }
    }

    pub fn name(&self) -> &str {
        self.filter.name()
    }
}

/// Merge global and route filters into one chain.
///
/// Ties keep their relative input order: globals first, then route filters.
pub fn merge_filters(global: &[OrderedFilter], route: &[OrderedFilter]) -> Vec<OrderedFilter> {
    let mut combined: Vec<OrderedFilter> = global.iter().chain(route).cloned().collect();
    combined.sort_by_key(|f| f.order);
    combined
}

/// Continuation over the remaining filters.
#[derive(Debug, Clone, Copy)]
pub struct FilterChain<'a> {
    filters: &'a [OrderedFilter],
    index: usize,
}

impl<'a> FilterChain<'a> {
    pub fn new(filters: &'a [OrderedFilter]) -> Self {
        Self { filters, index: 0 }
    }

    /// Filters still to run, including the next one.
    pub fn remaining(&self) -> &'a [OrderedFilter] {
        self.filters.get(self.index..).unwrap_or_default()
    }

    /// Run the next filter; the end of the chain completes immediately.
    pub async fn proceed(self, exchange: &mut Exchange) -> Result<(), GatewayError> {
        match self.filters.get(self.index) {
            Some(next) => {
                let rest = FilterChain {
                    filters: self.filters,
                    index: self.index + 1,
                };
                next.filter.filter(exchange, rest).await
            }
            None => Ok(()),
        }
    }
}
