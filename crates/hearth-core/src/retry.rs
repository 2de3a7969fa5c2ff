//! Retry policy: bounded retries with backoff for persistence writes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::HomeError;
use crate::ports::StoreError;

/// Upper bound of a single backoff delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry policy for persistence writes.
///
/// A write that still fails after `max_attempts` surfaces as
/// `HomeError::PersistenceWriteFailure`; it is never swallowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting. Used by tests that inject failures.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// Example with base_delay=10ms, multiplier=2.0:
    /// - attempt 1 (first failure): 10ms
    /// - attempt 2: 20ms
    /// - attempt 3: 40ms
    ///
    /// Saturates at `MAX_DELAY`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms).as_secs_f64();
        let delay_secs = base * self.multiplier.powi(attempts.saturating_sub(1).min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(delay_secs.max(0.0))
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `store` names the persisted store in logs and in the returned error.
    pub async fn run<T>(
        &self,
        store: &'static str,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, HomeError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= max_attempts => {
                    return Err(HomeError::PersistenceWriteFailure {
                        store,
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    let delay = self.next_delay(attempt);
                    warn!(store, attempt, max_attempts, error = %err, "persistence write failed, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
