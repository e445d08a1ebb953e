use crate::domain::{buckets_for, InvalidationSignal, RealtimeConfig};
use common::domain::{ChangeFeed, ChangeNotification, ChangeStream, QueryCache};
use depot_resilience::{ErrorFingerprint, ErrorThrottle};
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Callback run after a notification's buckets have been invalidated
pub type InvalidationListener = Arc<dyn Fn(&InvalidationSignal) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Live,
    Reconnecting,
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Live => "live",
            ChannelStatus::Reconnecting => "reconnecting",
            ChannelStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Liveness {
    status: ChannelStatus,
    live_since: Option<Instant>,
    last_notification_at: Option<Instant>,
}

/// State shared between a topic's channel task and the manager
struct ChannelShared {
    topic: String,
    listeners: Mutex<HashMap<u64, InvalidationListener>>,
    liveness: Mutex<Liveness>,
}

impl ChannelShared {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            listeners: Mutex::new(HashMap::new()),
            liveness: Mutex::new(Liveness {
                status: ChannelStatus::Connecting,
                live_since: None,
                last_notification_at: None,
            }),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        let mut liveness = self.liveness.lock().unwrap_or_else(PoisonError::into_inner);
        liveness.status = status;
        liveness.live_since = (status == ChannelStatus::Live).then(Instant::now);
    }

    fn mark_notification(&self) {
        self.liveness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_notification_at = Some(Instant::now());
    }

    fn listeners(&self) -> Vec<InvalidationListener> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

struct Channel {
    shared: Arc<ChannelShared>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Keeps cached views consistent with the backend by turning change-feed
/// notifications into bucket invalidations.
///
/// At most one feed channel is open per topic, however many subscribers it
/// has. A channel reconnects on its own until its last subscriber leaves or
/// the manager shuts down.
pub struct RealtimeConsistencyManager {
    feed: Arc<dyn ChangeFeed>,
    cache: Arc<dyn QueryCache>,
    throttle: Arc<ErrorThrottle>,
    config: RealtimeConfig,
    channels: Mutex<HashMap<String, Channel>>,
    next_listener_id: AtomicU64,
    shutdown_token: CancellationToken,
}

impl RealtimeConsistencyManager {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        cache: Arc<dyn QueryCache>,
        throttle: Arc<ErrorThrottle>,
        config: RealtimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            feed,
            cache,
            throttle,
            config,
            channels: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Attach `on_invalidate` to `topic`, opening the topic's channel if this
    /// is its first subscriber. Must be called from within a tokio runtime.
    ///
    /// After [`shutdown`](Self::shutdown) no channel is opened and the
    /// returned handle is already inactive.
    pub fn subscribe<F>(self: &Arc<Self>, topic: &str, on_invalidate: F) -> SubscriptionHandle
    where
        F: Fn(&InvalidationSignal) + Send + Sync + 'static,
    {
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);

        if self.shutdown_token.is_cancelled() {
            warn!(topic = %topic, "subscribe after shutdown ignored");
            return SubscriptionHandle {
                topic: topic.to_string(),
                listener_id,
                manager: Weak::new(),
                released: Arc::new(AtomicBool::new(true)),
            };
        }

        let channel = channels
            .entry(topic.to_string())
            .or_insert_with(|| self.open_channel(topic));
        let listener_count = {
            let mut listeners = channel
                .shared
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.insert(listener_id, Arc::new(on_invalidate));
            listeners.len()
        };

        debug!(topic = %topic, listener_id, listener_count, "listener subscribed");

        SubscriptionHandle {
            topic: topic.to_string(),
            listener_id,
            manager: Arc::downgrade(self),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    fn open_channel(&self, topic: &str) -> Channel {
        let shared = Arc::new(ChannelShared::new(topic));
        let token = self.shutdown_token.child_token();

        let task = tokio::spawn(run_channel(
            Arc::clone(&shared),
            Arc::clone(&self.feed),
            Arc::clone(&self.cache),
            Arc::clone(&self.throttle),
            self.config.clone(),
            token.clone(),
        ));

        info!(topic = %topic, "opened change feed channel");
        Channel {
            shared,
            token,
            task,
        }
    }

    fn release(&self, topic: &str, listener_id: u64) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(channel) = channels.get(topic) else {
            return;
        };

        let remaining = {
            let mut listeners = channel
                .shared
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.remove(&listener_id);
            listeners.len()
        };
        debug!(topic = %topic, listener_id, remaining, "listener unsubscribed");

        if remaining == 0 {
            if let Some(channel) = channels.remove(topic) {
                channel.token.cancel();
                info!(topic = %topic, "closed change feed channel");
            }
        }
    }

    /// Current state of the topic's channel, `None` if it has no subscribers
    pub fn channel_status(&self, topic: &str) -> Option<ChannelStatus> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(topic).map(|channel| {
            channel
                .shared
                .liveness
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .status
        })
    }

    /// Whether views fed by `topic` should be polled instead of trusted.
    ///
    /// A channel is stale when it is not live, or when neither a notification
    /// nor the connection itself happened within `horizon`.
    pub fn is_stale(&self, topic: &str, horizon: Duration) -> bool {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(channel) = channels.get(topic) else {
            return true;
        };
        let liveness = channel
            .shared
            .liveness
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if liveness.status != ChannelStatus::Live {
            return true;
        }

        let last_activity = match (liveness.last_notification_at, liveness.live_since) {
            (Some(notified), Some(live)) => notified.max(live),
            (notified, live) => match notified.or(live) {
                Some(at) => at,
                None => return true,
            },
        };
        last_activity.elapsed() >= horizon
    }

    pub fn active_channels(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(topic)
            .map(|channel| {
                channel
                    .shared
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .unwrap_or(0)
    }

    /// Cancel every channel and wait for the channel tasks to finish
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let drained: Vec<Channel> = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels.drain().map(|(_, channel)| channel).collect()
        };

        for channel in drained {
            channel.token.cancel();
            if let Err(e) = channel.task.await {
                warn!(topic = %channel.shared.topic, error = %e, "channel task ended abnormally");
            }
        }
        info!("realtime consistency manager stopped");
    }
}

/// Registration of one listener on a topic.
///
/// Clones share the same registration, so [`unsubscribe`](Self::unsubscribe)
/// takes effect once no matter how many clones call it.
#[derive(Clone)]
pub struct SubscriptionHandle {
    topic: String,
    listener_id: u64,
    manager: Weak<RealtimeConsistencyManager>,
    released: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    /// Detach this listener. Returns `false` if it was already detached.
    pub fn unsubscribe(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.release(&self.topic, self.listener_id);
        }
        true
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("listener_id", &self.listener_id)
            .field("active", &self.is_active())
            .finish()
    }
}

enum SessionEnd {
    Cancelled,
    Disconnected,
}

/// Keep one topic's feed open until cancelled, reconnecting with capped
/// exponential backoff whenever the feed cannot be opened or ends.
#[instrument(name = "change_feed_channel", skip_all, fields(topic = %shared.topic))]
async fn run_channel(
    shared: Arc<ChannelShared>,
    feed: Arc<dyn ChangeFeed>,
    cache: Arc<dyn QueryCache>,
    throttle: Arc<ErrorThrottle>,
    config: RealtimeConfig,
    token: CancellationToken,
) {
    let mut consecutive_failures: u32 = 0;

    loop {
        let opened = tokio::select! {
            _ = token.cancelled() => break,
            opened = feed.open(&shared.topic) => opened,
        };

        match opened {
            Ok(stream) => {
                shared.set_status(ChannelStatus::Live);
                consecutive_failures = 0;
                info!(topic = %shared.topic, "change feed channel live");

                match consume(&shared, stream, cache.as_ref(), &throttle, &token).await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Disconnected => {
                        report_channel_problem(&throttle, &shared.topic, "change feed disconnected")
                    }
                }
            }
            Err(e) => {
                report_channel_problem(&throttle, &shared.topic, &e.to_string());
            }
        }

        consecutive_failures = consecutive_failures.saturating_add(1);
        shared.set_status(ChannelStatus::Reconnecting);
        let delay = config.reconnect_delay(consecutive_failures);
        debug!(
            topic = %shared.topic,
            attempt = consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            "reconnecting change feed"
        );

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_status(ChannelStatus::Closed);
    debug!(topic = %shared.topic, "change feed channel stopped");
}

async fn consume(
    shared: &ChannelShared,
    mut stream: ChangeStream,
    cache: &dyn QueryCache,
    throttle: &ErrorThrottle,
    token: &CancellationToken,
) -> SessionEnd {
    loop {
        tokio::select! {
            _ = token.cancelled() => return SessionEnd::Cancelled,
            next = stream.next() => match next {
                Some(notification) => apply_notification(shared, cache, throttle, notification),
                None => return SessionEnd::Disconnected,
            },
        }
    }
}

fn apply_notification(
    shared: &ChannelShared,
    cache: &dyn QueryCache,
    throttle: &ErrorThrottle,
    notification: ChangeNotification,
) {
    shared.mark_notification();

    let buckets = buckets_for(&notification);
    for bucket in &buckets {
        cache.invalidate(bucket);
    }

    trace!(
        topic = %shared.topic,
        entity_id = %notification.entity_id,
        event_kind = ?notification.event_kind,
        buckets = buckets.len(),
        "applied change notification"
    );

    let signal = InvalidationSignal {
        topic: shared.topic.clone(),
        entity_id: notification.entity_id,
        event_kind: notification.event_kind,
        buckets,
    };
    // A failing listener must not take the channel or its siblings down
    for listener in shared.listeners() {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(&signal))).is_err() {
            report_listener_panic(throttle, &shared.topic);
        }
    }
}

fn report_listener_panic(throttle: &ErrorThrottle, topic: &str) {
    let fingerprint =
        ErrorFingerprint::new("notify", "listener", "listener panicked").with_entity_id(topic);
    if throttle.should_log_fingerprint(&fingerprint) {
        error!(topic = %topic, "invalidation listener panicked");
    } else {
        trace!(fingerprint = %fingerprint, "suppressed repeated listener panic");
    }
}

fn report_channel_problem(throttle: &ErrorThrottle, topic: &str, message: &str) {
    let fingerprint = ErrorFingerprint::new("subscribe", "channel", message).with_entity_id(topic);
    if throttle.should_log_fingerprint(&fingerprint) {
        warn!(topic = %topic, error = %message, "change feed channel interrupted");
    } else {
        trace!(fingerprint = %fingerprint, "suppressed repeated channel error");
    }
}
