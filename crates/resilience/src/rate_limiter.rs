use crate::sweeper::Sweep;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per key within one window
    pub max_requests: u32,

    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining_requests: u32,
    pub reset_at: Instant,
}

impl RateLimitDecision {
    /// Time left until the key's window resets
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rate limit exceeded for {limiter} limiter, retry in {}s", .retry_after.as_secs().max(1))]
pub struct RateLimitExceeded {
    pub limiter: String,
    pub key: String,
    pub retry_after: Duration,
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_reset_at: Instant,
}

/// Fixed-window request counter keyed by caller-defined strings.
///
/// A key's count resets entirely once its window expires; there is no
/// partial decay inside a window. Expired entries are only removed by
/// [`Sweep::sweep`], never on the admission path.
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request for `key` and report whether it is admitted.
    pub fn is_allowed(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let window = self.config.window();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                window_reset_at: now + window,
            });

        if now >= entry.window_reset_at {
            entry.count = 0;
            entry.window_reset_at = now + window;
        }

        if entry.count >= self.config.max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining_requests: 0,
                reset_at: entry.window_reset_at,
            };
        }

        entry.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining_requests: self.config.max_requests - entry.count,
            reset_at: entry.window_reset_at,
        }
    }

    /// Like [`is_allowed`](Self::is_allowed) but turns a denial into a typed error.
    pub fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitExceeded> {
        let decision = self.is_allowed(key);
        if decision.allowed {
            Ok(decision)
        } else {
            debug!(limiter = %self.name, key = %key, "rate limit exceeded");
            Err(RateLimitExceeded {
                limiter: self.name.clone(),
                key: key.to_string(),
                retry_after: decision.retry_after(),
            })
        }
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Sweep for RateLimiter {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now < entry.window_reset_at);
        before - entries.len()
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// Run `operation` only if `key` is admitted by `limiter`.
///
/// A denial never reaches `operation`; it is converted into the caller's
/// error type so it can carry the remaining wait up to the user.
pub async fn with_rate_limit<T, E, F, Fut>(
    limiter: &RateLimiter,
    key: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<RateLimitExceeded>,
{
    limiter.check(key)?;
    operation().await
}

/// Limits for the three concern classes, each with an independent key space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitersConfig {
    pub api: RateLimitConfig,
    pub auth: RateLimitConfig,
    pub sensitive: RateLimitConfig,
}

impl Default for RateLimitersConfig {
    fn default() -> Self {
        Self {
            api: RateLimitConfig {
                max_requests: 100,
                window_secs: 60,
            },
            auth: RateLimitConfig {
                max_requests: 5,
                window_secs: 15 * 60,
            },
            sensitive: RateLimitConfig {
                max_requests: 10,
                window_secs: 60,
            },
        }
    }
}

/// Named limiter instances: general API traffic, authentication attempts,
/// and sensitive actions such as status transitions.
pub struct RateLimiters {
    pub api: RateLimiter,
    pub auth: RateLimiter,
    pub sensitive: RateLimiter,
}

impl RateLimiters {
    pub fn new(config: RateLimitersConfig) -> Self {
        Self {
            api: RateLimiter::new("api", config.api),
            auth: RateLimiter::new("auth", config.auth),
            sensitive: RateLimiter::new("sensitive", config.sensitive),
        }
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(RateLimitersConfig::default())
    }
}

impl Sweep for RateLimiters {
    fn sweep(&self) -> usize {
        self.api.sweep() + self.auth.sweep() + self.sensitive.sweep()
    }

    fn label(&self) -> &str {
        "rate_limiters"
    }
}
