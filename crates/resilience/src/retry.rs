use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure surfaced once every attempt of an operation has failed.
#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempts: {last_error}")]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E: Display> RetryError<E> {
    /// Message of the final underlying failure
    pub fn last_message(&self) -> String {
        self.last_error.to_string()
    }

    pub fn into_inner(self) -> E {
        self.last_error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Total attempts including the first one (default: 3)
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each following one (default: 500ms)
    pub base_delay_ms: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicyConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Runs an async operation up to `max_attempts` times, sleeping
/// `base_delay * 2^(n-2)` before attempt `n`.
///
/// The policy retries every error it sees. Callers that need to stop on a
/// non-retryable failure return it inside `Ok` and unwrap it afterwards.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryPolicyConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay to wait before the given 1-indexed attempt.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Execute `operation`, passing it the current 1-indexed attempt number.
    ///
    /// Attempts are strictly sequential.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            let delay = self.delay_before_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= self.max_attempts => {
                    warn!(
                        attempts = attempt,
                        error = %err,
                        "retry attempts exhausted"
                    );
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        next_delay_ms = self.delay_before_attempt(attempt + 1).as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryPolicyConfig::default())
    }
}
