use crate::domain::document::DocumentStatus;
use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventKind {
    Insert,
    Update,
    Delete,
}

/// Partial row image carried by a change event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRowImage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl DocumentRowImage {
    /// Parsed status, `None` when absent or not a known status
    pub fn status(&self) -> Option<DocumentStatus> {
        self.status.as_deref().and_then(|s| s.parse().ok())
    }
}

/// A single row change pushed by the backend.
///
/// Delivery is at-least-once with no ordering guarantee across documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub entity_id: String,
    pub event_kind: ChangeEventKind,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub before: Option<DocumentRowImage>,
    #[serde(default)]
    pub after: Option<DocumentRowImage>,
}

impl ChangeNotification {
    /// Known status of the row before the change
    pub fn before_status(&self) -> Option<DocumentStatus> {
        self.before.as_ref().and_then(DocumentRowImage::status)
    }

    /// Known status of the row after the change
    pub fn after_status(&self) -> Option<DocumentStatus> {
        self.after.as_ref().and_then(DocumentRowImage::status)
    }
}

/// Notifications for one topic. The stream ending means the channel dropped.
pub type ChangeStream = BoxStream<'static, ChangeNotification>;

/// Transport delivering row-change notifications for a topic
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn open(&self, topic: &str) -> DomainResult<ChangeStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_update_with_images() {
        let json = r#"{
            "entity_id": "doc-1",
            "event_kind": "UPDATE",
            "observed_at": "2026-03-01T10:00:00Z",
            "before": {"id": "doc-1", "status": "stored"},
            "after": {"id": "doc-1", "status": "request_dispatch"}
        }"#;
        let notification: ChangeNotification = serde_json::from_str(json).unwrap();

        assert_eq!(notification.event_kind, ChangeEventKind::Update);
        assert_eq!(notification.before_status(), Some(DocumentStatus::Stored));
        assert_eq!(
            notification.after_status(),
            Some(DocumentStatus::RequestDispatch)
        );
    }

    #[test]
    fn test_decode_delete_without_images() {
        let json = r#"{"entity_id": "doc-2", "event_kind": "DELETE"}"#;
        let notification: ChangeNotification = serde_json::from_str(json).unwrap();

        assert_eq!(notification.event_kind, ChangeEventKind::Delete);
        assert!(notification.before.is_none());
        assert_eq!(notification.after_status(), None);
    }

    #[test]
    fn test_unknown_status_is_ignored() {
        let image = DocumentRowImage {
            id: Some("doc-3".to_string()),
            status: Some("archived".to_string()),
        };
        assert_eq!(image.status(), None);
    }
}
