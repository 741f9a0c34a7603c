/// Exponential backoff with a delay ceiling
///
/// delay(n) = min(base * 2^n, max), optionally spread by jitter.
/// The retry queue uses the exponent `attempt_count - 1` (first retry waits
/// `base`), the connection monitor uses the number of reconnect cycles so far.
use crate::{RecoveryError, RecoveryResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponents beyond this saturate at the ceiling anyway
const MAX_EXPONENT: u32 = 63;

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay for exponent 0
    base_delay: Duration,

    /// Maximum delay cap
    max_delay: Duration,

    /// Jitter factor (0.0 - 1.0), zero by default so delays are exact
    jitter_factor: f64,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: 0.0,
        }
    }

    /// Spread each delay by ± `jitter_factor` of itself
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Queue preset: 1s doubling up to 30s
    pub fn queue_default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000))
    }

    /// Reconnect preset: 1s doubling up to 30s
    pub fn reconnect_default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000))
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay for the given exponent: min(base * 2^exponent, max)
    pub fn delay_for(&self, exponent: u32) -> Duration {
        let factor = 2_u128.pow(exponent.min(MAX_EXPONENT));
        let exponential_ms = self.base_delay.as_millis().saturating_mul(factor);
        let capped_ms = exponential_ms.min(self.max_delay.as_millis());

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(capped_ms as u64);
        }

        let jitter_range = capped_ms as f64 * self.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let final_ms = (capped_ms as f64 + jitter).max(0.0);

        Duration::from_millis(final_ms as u64)
    }

    /// Delay before the next attempt of an item that has failed
    /// `attempt_count` times: min(base * 2^(attempt_count - 1), max)
    pub fn retry_delay(&self, attempt_count: u32) -> Duration {
        self.delay_for(attempt_count.saturating_sub(1))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::queue_default()
    }
}

/// Per-operation retry settings supplied on enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum executions before the item is marked failed
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay_ms: u64,

    /// Backoff ceiling
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    /// Whether an item that has failed `attempt_count` times may run again
    pub fn allows_attempt(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_retries
    }

    /// An item must be allowed at least one execution
    pub fn validate(&self) -> RecoveryResult<()> {
        if self.max_retries == 0 {
            return Err(RecoveryError::Config(
                "retry max_retries must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(RecoveryError::Config(
                "retry base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}
