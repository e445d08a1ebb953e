//! Failure-containment primitives shared by the transition gateway and the
//! realtime consistency manager.
//!
//! - [`RetryPolicy`]: bounded retries with exponential backoff
//! - [`RateLimiter`]: fixed-window request counting per key
//! - [`ErrorThrottle`]: suppression of repeated identical log events
//! - [`spawn_sweeper`]: periodic eviction of stale entries from the two maps
//!
//! # Example
//!
//! ```no_run
//! use depot_resilience::{RetryPolicy, RateLimiter, RateLimitConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::new("api", RateLimitConfig::default());
//!     let decision = limiter.is_allowed("user-1");
//!     assert!(decision.allowed);
//!
//!     let policy = RetryPolicy::new(3, Duration::from_millis(200));
//!     let result: Result<u32, _> = policy
//!         .run(|attempt| async move {
//!             if attempt < 2 {
//!                 Err("connection reset")
//!             } else {
//!                 Ok(attempt)
//!             }
//!         })
//!         .await;
//!     assert_eq!(result.unwrap(), 2);
//! }
//! ```

mod error_throttle;
mod rate_limiter;
mod retry;
mod sweeper;

pub use error_throttle::*;
pub use rate_limiter::*;
pub use retry::*;
pub use sweeper::*;
