use chrono::Utc;
use common::domain::{
    CacheBucket, ChangeEventKind, ChangeNotification, ChangeStream, DocumentRowImage,
    DocumentStatus, MockChangeFeed,
};
use depot_resilience::ErrorThrottle;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use realtime_sync::{
    ChannelStatus, InMemoryQueryCache, InvalidationSignal, RealtimeConfig,
    RealtimeConsistencyManager,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOPIC: &str = "documents";

fn channel_stream() -> (UnboundedSender<ChangeNotification>, ChangeStream) {
    let (tx, rx) = unbounded();
    (tx, rx.boxed())
}

fn status_change(entity_id: &str, from: &str, to: &str) -> ChangeNotification {
    ChangeNotification {
        entity_id: entity_id.to_string(),
        event_kind: ChangeEventKind::Update,
        observed_at: Utc::now(),
        before: Some(DocumentRowImage {
            id: Some(entity_id.to_string()),
            status: Some(from.to_string()),
        }),
        after: Some(DocumentRowImage {
            id: Some(entity_id.to_string()),
            status: Some(to.to_string()),
        }),
    }
}

fn manager(feed: MockChangeFeed, cache: Arc<InMemoryQueryCache>) -> Arc<RealtimeConsistencyManager> {
    RealtimeConsistencyManager::new(
        Arc::new(feed),
        cache,
        Arc::new(ErrorThrottle::default()),
        RealtimeConfig::default(),
    )
}

fn recorder() -> (
    Arc<Mutex<Vec<InvalidationSignal>>>,
    impl Fn(&InvalidationSignal) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |signal: &InvalidationSignal| {
        sink.lock().unwrap().push(signal.clone())
    })
}

/// Let spawned channel tasks run; the paused clock advances while idle
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        settle().await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_share_one_channel() {
    let (_tx, stream) = channel_stream();
    let mut feed = MockChangeFeed::new();
    feed.expect_open()
        .withf(|topic| topic == TOPIC)
        .times(1)
        .return_once(move |_| Ok(stream));

    let manager = manager(feed, Arc::new(InMemoryQueryCache::new()));
    let first = manager.subscribe(TOPIC, |_| {});
    let second = manager.subscribe(TOPIC, |_| {});
    settle().await;

    assert_eq!(manager.active_channels(), 1);
    assert_eq!(manager.listener_count(TOPIC), 2);

    assert!(first.unsubscribe());
    assert_eq!(manager.active_channels(), 1);
    assert_eq!(manager.channel_status(TOPIC), Some(ChannelStatus::Live));

    assert!(second.unsubscribe());
    assert_eq!(manager.active_channels(), 0);
    assert_eq!(manager.channel_status(TOPIC), None);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_from_cloned_handles_runs_once() {
    let (_tx, stream) = channel_stream();
    let mut feed = MockChangeFeed::new();
    feed.expect_open().times(1).return_once(move |_| Ok(stream));

    let manager = manager(feed, Arc::new(InMemoryQueryCache::new()));
    let handle = manager.subscribe(TOPIC, |_| {});
    let other = manager.subscribe(TOPIC, |_| {});
    settle().await;

    let sigint_copy = handle.clone();
    let sigterm_copy = handle.clone();
    assert!(sigint_copy.unsubscribe());
    assert!(!sigterm_copy.unsubscribe());
    assert!(!handle.is_active());

    assert_eq!(manager.listener_count(TOPIC), 1);
    assert!(other.is_active());
    other.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_notifications_invalidate_twice_and_converge() {
    let (tx, stream) = channel_stream();
    let mut feed = MockChangeFeed::new();
    feed.expect_open().times(1).return_once(move |_| Ok(stream));

    let cache = Arc::new(InMemoryQueryCache::new());
    let list = CacheBucket::Documents;
    let doc = CacheBucket::Document("doc-1".to_string());
    cache.put(&list, json!([{"document_id": "doc-1", "status": "stored"}]));
    cache.put(&doc, json!({"document_id": "doc-1", "status": "stored"}));

    let manager = manager(feed, Arc::clone(&cache));
    let (seen, listener) = recorder();
    let handle = manager.subscribe(TOPIC, listener);
    settle().await;

    let change = status_change("doc-1", "stored", "request_dispatch");
    tx.unbounded_send(change.clone()).unwrap();
    tx.unbounded_send(change).unwrap();
    wait_for(|| seen.lock().unwrap().len() == 2).await;

    assert_eq!(cache.invalidations(&list), 2);
    assert_eq!(cache.invalidations(&doc), 2);
    assert_eq!(
        cache.invalidations(&CacheBucket::Status(DocumentStatus::RequestDispatch)),
        2
    );
    assert_eq!(
        cache.invalidations(&CacheBucket::Status(DocumentStatus::ConfirmedDispatch)),
        0
    );
    assert!(cache.is_stale(&doc));

    // Next fetch brings the authoritative row back
    cache.put(&doc, json!({"document_id": "doc-1", "status": "request_dispatch"}));
    assert_eq!(
        cache.get_fresh(&doc),
        Some(json!({"document_id": "doc-1", "status": "request_dispatch"}))
    );

    let signals = seen.lock().unwrap();
    assert_eq!(signals[0], signals[1]);
    assert_eq!(signals[0].entity_id, "doc-1");
    assert!(signals[0].buckets.contains(&doc));
    drop(signals);

    handle.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn test_every_listener_receives_the_signal() {
    let (tx, stream) = channel_stream();
    let mut feed = MockChangeFeed::new();
    feed.expect_open().times(1).return_once(move |_| Ok(stream));

    let manager = manager(feed, Arc::new(InMemoryQueryCache::new()));
    let (first_seen, first_listener) = recorder();
    let (second_seen, second_listener) = recorder();
    let first = manager.subscribe(TOPIC, first_listener);
    let second = manager.subscribe(TOPIC, second_listener);
    settle().await;

    tx.unbounded_send(status_change("doc-2", "request_dispatch", "confirmed_dispatch"))
        .unwrap();
    wait_for(|| first_seen.lock().unwrap().len() == 1 && second_seen.lock().unwrap().len() == 1)
        .await;

    first.unsubscribe();
    tx.unbounded_send(status_change("doc-2", "confirmed_dispatch", "confirmed_dispatch"))
        .unwrap();
    wait_for(|| second_seen.lock().unwrap().len() == 2).await;
    assert_eq!(first_seen.lock().unwrap().len(), 1);

    second.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_triggers_resubscribe() {
    let (first_tx, first_stream) = channel_stream();
    let (second_tx, second_stream) = channel_stream();

    let mut feed = MockChangeFeed::new();
    let mut seq = mockall::Sequence::new();
    feed.expect_open()
        .times(1)
        .in_sequence(&mut seq)
        .return_once(move |_| Ok(first_stream));
    feed.expect_open()
        .times(1)
        .in_sequence(&mut seq)
        .return_once(move |_| Ok(second_stream));

    let cache = Arc::new(InMemoryQueryCache::new());
    let manager = manager(feed, Arc::clone(&cache));
    let (seen, listener) = recorder();
    let handle = manager.subscribe(TOPIC, listener);
    settle().await;
    assert_eq!(manager.channel_status(TOPIC), Some(ChannelStatus::Live));

    drop(first_tx);
    settle().await;
    assert_eq!(manager.channel_status(TOPIC), Some(ChannelStatus::Reconnecting));

    wait_for(|| manager.channel_status(TOPIC) == Some(ChannelStatus::Live)).await;
    second_tx
        .unbounded_send(status_change("doc-3", "stored", "request_dispatch"))
        .unwrap();
    wait_for(|| seen.lock().unwrap().len() == 1).await;
    assert_eq!(cache.invalidations(&CacheBucket::Documents), 1);

    handle.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_every_channel() {
    let (_carriers_tx, carriers_stream) = channel_stream();
    let (_docs_tx, docs_stream) = channel_stream();

    let mut feed = MockChangeFeed::new();
    feed.expect_open()
        .withf(|topic| topic == "documents")
        .times(1)
        .return_once(move |_| Ok(docs_stream));
    feed.expect_open()
        .withf(|topic| topic == "carriers")
        .times(1)
        .return_once(move |_| Ok(carriers_stream));

    let manager = manager(feed, Arc::new(InMemoryQueryCache::new()));
    let documents = manager.subscribe("documents", |_| {});
    let carriers = manager.subscribe("carriers", |_| {});
    settle().await;
    assert_eq!(manager.active_channels(), 2);

    manager.shutdown().await;
    assert_eq!(manager.active_channels(), 0);

    // Handles stay safe to release after shutdown
    assert!(documents.unsubscribe());
    assert!(carriers.unsubscribe());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_listener_does_not_stop_the_channel() {
    let (tx, stream) = channel_stream();
    let mut feed = MockChangeFeed::new();
    feed.expect_open().times(1).return_once(move |_| Ok(stream));

    let cache = Arc::new(InMemoryQueryCache::new());
    let manager = manager(feed, Arc::clone(&cache));
    let broken = manager.subscribe(TOPIC, |_| panic!("listener bug"));
    let (seen, listener) = recorder();
    let healthy = manager.subscribe(TOPIC, listener);
    settle().await;

    tx.unbounded_send(status_change("doc-1", "stored", "request_dispatch"))
        .unwrap();
    wait_for(|| seen.lock().unwrap().len() == 1).await;

    tx.unbounded_send(status_change("doc-2", "stored", "request_dispatch"))
        .unwrap();
    wait_for(|| seen.lock().unwrap().len() == 2).await;

    assert_eq!(manager.channel_status(TOPIC), Some(ChannelStatus::Live));
    assert_eq!(
        cache.invalidations(&CacheBucket::Document("doc-2".to_string())),
        1
    );

    broken.unsubscribe();
    healthy.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_after_shutdown_opens_nothing() {
    let mut feed = MockChangeFeed::new();
    feed.expect_open().times(0);

    let manager = manager(feed, Arc::new(InMemoryQueryCache::new()));
    manager.shutdown().await;

    let handle = manager.subscribe(TOPIC, |_| {});
    settle().await;

    assert!(!handle.is_active());
    assert!(!handle.unsubscribe());
    assert_eq!(manager.active_channels(), 0);
    assert_eq!(manager.channel_status(TOPIC), None);
}
