use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INTERVAL_MILLIS: u64 = 1_000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const MAX_BACKOFF_MILLIS: u64 = 60 * 1_000;
pub const RANDOM_FACTOR: f64 = 0.5;

/// Exponential backoff with jitter: `interval * factor^attempt`, randomized
/// by up to [`RANDOM_FACTOR`] in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub interval_millis: u64,
    pub backoff_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            interval_millis: DEFAULT_INTERVAL_MILLIS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl BackoffConfig {
    /// Backoff that never waits.
    pub fn immediate() -> Self {
        Self {
            interval_millis: 0,
            backoff_factor: 1.0,
        }
    }

    /// Delay to wait before retry number `backoff_count` (zero based).
    pub fn delay(&self, backoff_count: u32) -> Duration {
        Duration::from_millis(calculate_backoff_with_rng(
            backoff_count,
            *self,
            &mut rand::thread_rng(),
        ))
    }
}

pub fn calculate_backoff_millis(backoff_count: u32) -> u64 {
    calculate_backoff_with_rng(
        backoff_count,
        BackoffConfig::default(),
        &mut rand::thread_rng(),
    )
}

pub fn calculate_backoff_with_rng<R: Rng + ?Sized>(
    backoff_count: u32,
    config: BackoffConfig,
    rng: &mut R,
) -> u64 {
    let base = (config.interval_millis as f64) * config.backoff_factor.powi(backoff_count as i32);
    let jitter = RANDOM_FACTOR * base * rng.gen_range(-1.0..=1.0);
    let value = (base + jitter)
        .round()
        .clamp(0.0, MAX_BACKOFF_MILLIS as f64);
    value as u64
}
