//! Rate limit key resolution.
//!
//! A [`KeyResolver`] names the identity a request is counted against.
//! `None` means no key could be derived; the rate limiting filter decides
//! whether that is a denial.
//!
//! Resolution is async so a resolver may consult an external service, such
//! as a token introspection endpoint. It takes the exchange mutably: the
//! exchange is `Send` but not `Sync`, and only a unique borrow keeps the
//! filter future `Send` across the await.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderName;
use serde::Deserialize;

use crate::http::exchange::Exchange;

#[async_trait]
pub trait KeyResolver: Send + Sync + fmt::Debug {
    async fn resolve(&self, exchange: &mut Exchange) -> Option<String>;
}

/// Client IP address.
#[derive(Debug, Default)]
pub struct RemoteAddrKeyResolver;

#[async_trait]
impl KeyResolver for RemoteAddrKeyResolver {
    async fn resolve(&self, exchange: &mut Exchange) -> Option<String> {
        exchange.request().remote_addr().map(|addr| addr.ip().to_string())
    }
}

/// First value of a request header, e.g. an API key.
#[derive(Debug)]
pub struct HeaderKeyResolver {
    header: HeaderName,
}

impl HeaderKeyResolver {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

#[async_trait]
impl KeyResolver for HeaderKeyResolver {
    async fn resolve(&self, exchange: &mut Exchange) -> Option<String> {
        exchange
            .request()
            .headers()
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// One bucket per route.
#[derive(Debug, Default)]
pub struct RouteIdKeyResolver;

#[async_trait]
impl KeyResolver for RouteIdKeyResolver {
    async fn resolve(&self, exchange: &mut Exchange) -> Option<String> {
        exchange.route_id().map(str::to_string)
    }
}

/// Configured choice of resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum KeyResolverSpec {
    #[default]
    RemoteAddr,
    Header { name: String },
    RouteId,
}

impl KeyResolverSpec {
    pub fn build(&self) -> Result<Arc<dyn KeyResolver>, String> {
        Ok(match self {
            KeyResolverSpec::RemoteAddr => Arc::new(RemoteAddrKeyResolver),
            KeyResolverSpec::Header { name } => Arc::new(HeaderKeyResolver::new(
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| format!("header `{name}`: {e}"))?,
            )),
            KeyResolverSpec::RouteId => Arc::new(RouteIdKeyResolver),
        })
    }
}
