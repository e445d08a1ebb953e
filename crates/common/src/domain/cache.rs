use crate::domain::document::DocumentStatus;
use std::fmt;

/// A cached query view that may need refetching after a change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheBucket {
    /// The full document list
    Documents,
    /// Documents filtered by status
    Status(DocumentStatus),
    /// A single document
    Document(String),
}

impl CacheBucket {
    pub fn key(&self) -> String {
        match self {
            CacheBucket::Documents => "documents".to_string(),
            CacheBucket::Status(status) => format!("documents:status:{}", status),
            CacheBucket::Document(id) => format!("document:{}", id),
        }
    }
}

impl fmt::Display for CacheBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Client-side query cache that can be told a view is stale
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait QueryCache: Send + Sync {
    /// Mark `bucket` stale so its next read refetches. Must be idempotent.
    fn invalidate(&self, bucket: &CacheBucket);
}
