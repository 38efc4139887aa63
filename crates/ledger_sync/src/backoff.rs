//! Exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

/// `min(base_delay * 2^retry_count, max_delay)` plus up to `jitter` of random delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            jitter: Duration::from_millis(1_000),
        }
    }
}

impl BackoffPolicy {
    /// Same policy without the random component
    pub fn without_jitter(self) -> Self {
        Self {
            jitter: Duration::ZERO,
            ..self
        }
    }

    /// Deterministic part of the delay for an entry that has failed `retry_count` times before
    pub fn capped_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Full delay, jitter included
    pub fn delay(&self, retry_count: u32) -> Duration {
        self.capped_delay(retry_count) + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
