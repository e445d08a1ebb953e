use common::domain::{CacheBucket, QueryCache};
use depot_resilience::Sweep;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct CachedView {
    value: serde_json::Value,
    fetched_at: Instant,
    stale: bool,
}

#[derive(Debug)]
struct BucketEntry {
    view: Option<CachedView>,
    invalidations: u64,
    touched_at: Instant,
}

impl BucketEntry {
    fn empty(now: Instant) -> Self {
        Self {
            view: None,
            invalidations: 0,
            touched_at: now,
        }
    }
}

/// In-memory implementation of QueryCache keyed by bucket.
///
/// Invalidation only flags a view; the next reader sees a miss and refetches.
/// Invalidating a bucket that holds no view still counts, so callers can
/// observe notifications that arrive before the first fetch.
///
/// Buckets neither written nor invalidated within the retention period are
/// dropped by [`Sweep::sweep`].
pub struct InMemoryQueryCache {
    entries: RwLock<HashMap<String, BucketEntry>>,
    retention: Duration,
}

impl InMemoryQueryCache {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Store a freshly fetched view
    pub fn put(&self, bucket: &CacheBucket, value: serde_json::Value) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(bucket.key())
            .or_insert_with(|| BucketEntry::empty(now));
        entry.view = Some(CachedView {
            value,
            fetched_at: now,
            stale: false,
        });
        entry.touched_at = now;
    }

    /// The cached view, or `None` if it was never fetched or has been invalidated
    pub fn get_fresh(&self, bucket: &CacheBucket) -> Option<serde_json::Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&bucket.key())
            .and_then(|entry| entry.view.as_ref())
            .filter(|view| !view.stale)
            .map(|view| view.value.clone())
    }

    pub fn is_stale(&self, bucket: &CacheBucket) -> bool {
        self.get_fresh(bucket).is_none()
    }

    /// When the bucket's current view was fetched
    pub fn fetched_at(&self, bucket: &CacheBucket) -> Option<Instant> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&bucket.key())
            .and_then(|entry| entry.view.as_ref())
            .map(|view| view.fetched_at)
    }

    /// Number of times `bucket` has been invalidated since it was last swept
    pub fn invalidations(&self, bucket: &CacheBucket) -> u64 {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&bucket.key())
            .map(|entry| entry.invalidations)
            .unwrap_or(0)
    }

    pub fn tracked_buckets(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for InMemoryQueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache for InMemoryQueryCache {
    fn invalidate(&self, bucket: &CacheBucket) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(bucket.key())
            .or_insert_with(|| BucketEntry::empty(now));
        if let Some(view) = entry.view.as_mut() {
            view.stale = true;
        }
        entry.invalidations += 1;
        entry.touched_at = now;
        trace!(bucket = %bucket, "bucket invalidated");
    }
}

impl Sweep for InMemoryQueryCache {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.touched_at) < self.retention);
        before - entries.len()
    }

    fn label(&self) -> &str {
        "query_cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalidate_marks_view_stale_until_refetch() {
        let cache = InMemoryQueryCache::new();
        let bucket = CacheBucket::Documents;

        cache.put(&bucket, json!([{"document_id": "doc-1", "status": "stored"}]));
        assert!(!cache.is_stale(&bucket));

        cache.invalidate(&bucket);
        assert!(cache.is_stale(&bucket));
        assert!(cache.get_fresh(&bucket).is_none());

        cache.put(&bucket, json!([{"document_id": "doc-1", "status": "request_dispatch"}]));
        assert_eq!(
            cache.get_fresh(&bucket),
            Some(json!([{"document_id": "doc-1", "status": "request_dispatch"}]))
        );
    }

    #[test]
    fn test_repeated_invalidation_is_harmless() {
        let cache = InMemoryQueryCache::new();
        let bucket = CacheBucket::Document("doc-1".to_string());
        cache.put(&bucket, json!({"status": "stored"}));

        cache.invalidate(&bucket);
        cache.invalidate(&bucket);

        assert!(cache.is_stale(&bucket));
        assert_eq!(cache.invalidations(&bucket), 2);
    }

    #[test]
    fn test_invalidating_unknown_bucket_is_counted() {
        let cache = InMemoryQueryCache::new();
        let bucket = CacheBucket::Document("never-fetched".to_string());
        cache.invalidate(&bucket);
        assert_eq!(cache.invalidations(&bucket), 1);
        assert!(cache.fetched_at(&bucket).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_idle_document_buckets() {
        let cache = InMemoryQueryCache::with_retention(Duration::from_secs(60));
        for n in 0..1000 {
            cache.invalidate(&CacheBucket::Document(format!("doc-{}", n)));
        }
        assert_eq!(cache.tracked_buckets(), 1000);

        tokio::time::advance(Duration::from_secs(30)).await;
        let recent = CacheBucket::Document("doc-recent".to_string());
        cache.put(&recent, json!({"status": "stored"}));
        assert_eq!(cache.sweep(), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.sweep(), 1000);
        assert_eq!(cache.tracked_buckets(), 1);
        assert_eq!(cache.invalidations(&CacheBucket::Document("doc-999".to_string())), 0);
        assert_eq!(cache.get_fresh(&recent), Some(json!({"status": "stored"})));
    }
}
