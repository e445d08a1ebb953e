use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A map of expiring entries that can be garbage collected in bulk.
pub trait Sweep: Send + Sync + 'static {
    /// Remove expired entries, returning how many were evicted
    fn sweep(&self) -> usize;

    fn label(&self) -> &str;
}

/// Spawn a task that sweeps `target` every `interval` until `token` is
/// cancelled or the target is dropped.
///
/// The task only holds a weak reference, so it never keeps the target alive.
pub fn spawn_sweeper<T: Sweep>(
    target: &Arc<T>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    let weak: Weak<T> = Arc::downgrade(target);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(target) = weak.upgrade() else {
                        break;
                    };
                    let evicted = target.sweep();
                    if evicted > 0 {
                        debug!(map = %target.label(), evicted, "swept expired entries");
                    } else {
                        trace!(map = %target.label(), "sweep found nothing to evict");
                    }
                }
            }
        }

        debug!("sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorThrottle, ThrottleConfig};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_interval() {
        let throttle = Arc::new(ErrorThrottle::new(ThrottleConfig {
            tracking_window_secs: 60,
            max_occurrences: 3,
            reset_window_secs: 30,
        }));
        throttle.should_log("fp");

        let token = CancellationToken::new();
        let handle = spawn_sweeper(&throttle, Duration::from_secs(60), token.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(throttle.tracked_fingerprints(), 0);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_target_dropped() {
        let throttle = Arc::new(ErrorThrottle::default());
        let handle = spawn_sweeper(&throttle, Duration::from_secs(1), CancellationToken::new());

        drop(throttle);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper should exit after target is dropped")
            .unwrap();
    }
}
