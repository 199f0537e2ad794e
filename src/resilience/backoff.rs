//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::route::definition::de;

/// Delay between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    #[serde(deserialize_with = "de::flexible")]
    pub first_ms: u64,

    /// Upper bound of any single delay.
    #[serde(deserialize_with = "de::flexible")]
    pub max_ms: u64,

    /// Multiplier applied per attempt.
    #[serde(default = "default_factor", deserialize_with = "de::flexible")]
    pub factor: u32,

    /// Add up to 10% random jitter.
    #[serde(default = "default_jitter", deserialize_with = "de::flexible")]
    pub jitter: bool,
}

fn default_factor() -> u32 {
    2
}

fn default_jitter() -> bool {
    true
}

impl BackoffConfig {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.first_ms, self.max_ms, self.factor, self.jitter)
    }
}

/// `base_ms * factor^(attempt-1)`, capped at `max_ms`, plus optional jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, factor: u32, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let multiplier = u64::from(factor.max(1)).saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(multiplier).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter && jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
