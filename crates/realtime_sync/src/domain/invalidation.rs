use common::domain::{CacheBucket, ChangeEventKind, ChangeNotification, DocumentStatus};

/// What a listener learns about one processed notification
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationSignal {
    pub topic: String,
    pub entity_id: String,
    pub event_kind: ChangeEventKind,
    pub buckets: Vec<CacheBucket>,
}

/// Cache buckets made stale by `notification`.
///
/// The list and entity buckets are always included. Status buckets come from
/// the row images; when an image the event needs is missing or carries an
/// unknown status, every status bucket is included instead.
pub fn buckets_for(notification: &ChangeNotification) -> Vec<CacheBucket> {
    let mut buckets = vec![CacheBucket::Documents];
    if !notification.entity_id.is_empty() {
        buckets.push(CacheBucket::Document(notification.entity_id.clone()));
    }

    let statuses: Vec<DocumentStatus> = match (
        notification.event_kind,
        notification.before_status(),
        notification.after_status(),
    ) {
        (ChangeEventKind::Insert, _, Some(after)) => vec![after],
        (ChangeEventKind::Delete, Some(before), _) => vec![before],
        (ChangeEventKind::Update, Some(before), Some(after)) if before == after => vec![after],
        (ChangeEventKind::Update, Some(before), Some(after)) => vec![before, after],
        _ => DocumentStatus::ALL.to_vec(),
    };

    buckets.extend(statuses.into_iter().map(CacheBucket::Status));
    buckets
}
