//! Route matching logic.
//!
//! # Responsibilities
//! - Define the predicate contract evaluated against each request
//! - Combine a route's predicates with AND semantics
//!
//! # Design Decisions
//! - Predicates are compiled once per route and shared read-only
//! - Evaluation reads the request only; the single permitted write is the
//!   path match recorded in [`MatchContext`]
//! - Empty predicate list = always matches

use std::fmt;

use chrono::{DateTime, Utc};

use crate::http::request::GatewayRequest;
use crate::route::definition::{DefinitionError, PredicateDefinition};
use crate::routing::pattern::PathMatch;
use crate::routing::predicates::PredicateSpec;

/// Scratch state for evaluating one route against one request.
#[derive(Debug, Clone)]
pub struct MatchContext {
    /// Instant used by time predicates.
    pub now: DateTime<Utc>,
    /// Captures recorded by a path predicate.
    pub path_match: Option<PathMatch>,
}

impl MatchContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            path_match: None,
        }
    }
}

/// A compiled matching condition.
pub trait RoutePredicate: Send + Sync + fmt::Debug {
    /// Returns true if the request satisfies this condition.
    fn matches(&self, request: &GatewayRequest, ctx: &mut MatchContext) -> bool;
}

/// Combines predicates with AND semantics, stopping at the first false.
#[derive(Debug, Default)]
pub struct AllOf {
    predicates: Vec<Box<dyn RoutePredicate>>,
}

impl AllOf {
    pub fn new(predicates: Vec<Box<dyn RoutePredicate>>) -> Self {
        Self { predicates }
    }

    /// Compile every definition; the first invalid one fails the whole set.
    pub fn compile(definitions: &[PredicateDefinition]) -> Result<Self, DefinitionError> {
        let predicates = definitions
            .iter()
            .map(|def| PredicateSpec::from_definition(def)?.compile(&def.name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(predicates))
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl RoutePredicate for AllOf {
    fn matches(&self, request: &GatewayRequest, ctx: &mut MatchContext) -> bool {
        self.predicates.iter().all(|p| p.matches(request, ctx))
    }
}
