//! Token bucket rate limiting.
//!
//! # Responsibilities
//! - Admit or deny one request per key against a token bucket
//! - Keep bucket state in a pluggable store with atomic per-key updates
//!
//! # Design Decisions
//! - Buckets are created full on first use and refilled lazily from the
//!   elapsed time, capped at the burst capacity
//! - The in-process store is sharded, so the read-modify-write of one key
//!   only contends with keys on the same shard
//! - Stored tokens never drop below zero; a denial reports `-1` remaining

use std::fmt;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::GatewayError;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub tokens_remaining: i64,
}

/// Per-key admission control.
#[async_trait]
pub trait RateLimiter: Send + Sync + fmt::Debug {
    async fn is_allowed(
        &self,
        key: &str,
        replenish_rate: u32,
        burst_capacity: u32,
    ) -> Result<RateLimitResponse, GatewayError>;
}

/// Stored state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: Instant,
}

/// Storage for bucket state.
///
/// `modify` must run `update` atomically with respect to other calls for
/// the same key. `None` is passed when the key has no state yet.
#[async_trait]
pub trait BucketStore: Send + Sync + fmt::Debug {
    async fn modify(
        &self,
        key: &str,
        update: &(dyn Fn(Option<BucketState>) -> (BucketState, RateLimitResponse) + Send + Sync),
    ) -> Result<RateLimitResponse, GatewayError>;
}

/// Bucket store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: DashMap<String, BucketState>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn modify(
        &self,
        key: &str,
        update: &(dyn Fn(Option<BucketState>) -> (BucketState, RateLimitResponse) + Send + Sync),
    ) -> Result<RateLimitResponse, GatewayError> {
        // Entry guards hold the shard write lock until dropped.
        if let Some(mut entry) = self.buckets.get_mut(key) {
            let (state, response) = update(Some(*entry));
            *entry = state;
            return Ok(response);
        }
        let response = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let (state, response) = update(Some(*entry.get()));
                entry.insert(state);
                response
            }
            Entry::Vacant(entry) => {
                let (state, response) = update(None);
                entry.insert(state);
                response
            }
        };
        Ok(response)
    }
}

/// Slack for refills that land a rounding error short of a whole token,
/// e.g. `1/3` s at three tokens per second.
const TOKEN_EPSILON: f64 = 1e-6;

/// Refill `previous` up to `now` and try to take one token.
pub fn refill_and_take(
    previous: Option<BucketState>,
    now: Instant,
    replenish_rate: u32,
    burst_capacity: u32,
) -> (BucketState, RateLimitResponse) {
    let capacity = f64::from(burst_capacity);
    let filled = match previous {
        None => capacity,
        Some(state) => {
            let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
            (state.tokens + elapsed * f64::from(replenish_rate)).min(capacity)
        }
    };

    if filled + TOKEN_EPSILON >= 1.0 {
        let tokens = (filled - 1.0).max(0.0);
        (
            BucketState { tokens, last_refill: now },
            RateLimitResponse {
                allowed: true,
                tokens_remaining: (tokens + TOKEN_EPSILON).floor() as i64,
            },
        )
    } else {
        (
            BucketState { tokens: filled.max(0.0), last_refill: now },
            RateLimitResponse {
                allowed: false,
                tokens_remaining: (filled - 1.0).floor() as i64,
            },
        )
    }
}

/// Token bucket limiter over any [`BucketStore`].
#[derive(Debug)]
pub struct TokenBucketRateLimiter<S = InMemoryBucketStore> {
    store: S,
}

impl TokenBucketRateLimiter<InMemoryBucketStore> {
    pub fn in_memory() -> Self {
        Self::new(InMemoryBucketStore::new())
    }
}

impl<S: BucketStore> TokenBucketRateLimiter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: BucketStore> RateLimiter for TokenBucketRateLimiter<S> {
    async fn is_allowed(
        &self,
        key: &str,
        replenish_rate: u32,
        burst_capacity: u32,
    ) -> Result<RateLimitResponse, GatewayError> {
        if burst_capacity == 0 {
            return Err(GatewayError::RateLimiter(format!(
                "burst capacity for `{key}` must be at least 1"
            )));
        }
        let update = move |previous: Option<BucketState>| {
            refill_and_take(previous, Instant::now(), replenish_rate, burst_capacity)
        };
        let response = self.store.modify(key, &update).await?;
        tracing::trace!(
            key,
            allowed = response.allowed,
            tokens_remaining = response.tokens_remaining,
            "Rate limit checked"
        );
        Ok(response)
    }
}
