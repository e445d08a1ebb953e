use async_trait::async_trait;
use common::domain::{ChangeFeed, ChangeNotification, ChangeStream, DomainError, DomainResult};
use futures::StreamExt;
use tracing::{debug, warn};

/// [`ChangeFeed`] backed by core NATS subscriptions.
///
/// Each topic maps to the subject `{subject_prefix}.{topic}`, whose messages
/// carry JSON-encoded [`ChangeNotification`]s.
pub struct NatsChangeFeed {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsChangeFeed {
    pub fn new(client: async_nats::Client, subject_prefix: impl Into<String>) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.into(),
        }
    }

    pub fn subject_for(&self, topic: &str) -> String {
        format!("{}.{}", self.subject_prefix, topic)
    }
}

#[async_trait]
impl ChangeFeed for NatsChangeFeed {
    async fn open(&self, topic: &str) -> DomainResult<ChangeStream> {
        let subject = self.subject_for(topic);
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| {
                DomainError::ChangeFeedError(format!("failed to subscribe to {}: {}", subject, e))
            })?;

        debug!(subject = %subject, "subscribed to change feed subject");

        let stream = subscriber
            .filter_map(move |message| {
                futures::future::ready(decode_notification(&message.subject, &message.payload))
            })
            .boxed();
        Ok(stream)
    }
}

/// Decode one message payload, skipping anything that is not a notification
pub fn decode_notification(subject: &str, payload: &[u8]) -> Option<ChangeNotification> {
    match serde_json::from_slice::<ChangeNotification>(payload) {
        Ok(notification) => Some(notification),
        Err(e) => {
            warn!(
                subject = %subject,
                error = %e,
                payload_len = payload.len(),
                "skipping undecodable change notification"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::ChangeEventKind;

    #[test]
    fn test_decode_valid_payload() {
        let payload = br#"{"entity_id":"doc-7","event_kind":"INSERT","after":{"status":"stored"}}"#;
        let notification = decode_notification("depot.changes.documents", payload).unwrap();
        assert_eq!(notification.entity_id, "doc-7");
        assert_eq!(notification.event_kind, ChangeEventKind::Insert);
    }

    #[test]
    fn test_decode_skips_garbage() {
        assert!(decode_notification("depot.changes.documents", b"not json").is_none());
        assert!(decode_notification("depot.changes.documents", br#"{"entity_id":"doc-7"}"#).is_none());
    }
}
