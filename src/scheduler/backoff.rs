//! Retry budget with exponential backoff.

use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry budget shared by every stage that calls something unreliable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "crate::pipeline::config::duration_ms")]
    pub base_delay: Duration,
    /// Cap on any single delay.
    #[serde(with = "crate::pipeline::config::duration_ms")]
    pub max_delay: Duration,
    /// Adds up to 20% random delay so retries from many workers spread out.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

/// A retried operation that never succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts allowed, counting the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Deterministic delay after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Delay to sleep before the next attempt, including jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = (delay.as_millis() as u64) / 5;
        let extra = rand::rng().random_range(0..=spread);
        (delay + Duration::from_millis(extra)).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, returns a non-retryable error, or the
    /// budget runs out. `op` receives the 1-based attempt number.
    pub async fn retry<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_attempts() || !is_retryable(&error) {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: error,
                        });
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                }
            }
        }
    }
}
