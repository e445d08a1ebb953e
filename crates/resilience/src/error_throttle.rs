use crate::sweeper::Sweep;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Window, measured from the first occurrence, in which repeats are counted (default: 60s)
    pub tracking_window_secs: u64,

    /// Occurrences reported per tracking window before suppression starts (default: 3)
    pub max_occurrences: u32,

    /// Idle time after which a fingerprint is forgotten (default: 5 minutes)
    pub reset_window_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            tracking_window_secs: 60,
            max_occurrences: 3,
            reset_window_secs: 5 * 60,
        }
    }
}

impl ThrottleConfig {
    pub fn tracking_window(&self) -> Duration {
        Duration::from_secs(self.tracking_window_secs)
    }

    pub fn reset_window(&self) -> Duration {
        Duration::from_secs(self.reset_window_secs)
    }
}

/// Identity of a logical error event.
///
/// Two failures share a fingerprint when action, entity type, message and
/// entity id all match, so retries of one failure collapse together while a
/// failure on a different entity is reported separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorFingerprint {
    pub action: String,
    pub entity_type: String,
    pub message: String,
    pub entity_id: Option<String>,
}

impl ErrorFingerprint {
    pub fn new(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            message: message.into(),
            entity_id: None,
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }
}

impl fmt::Display for ErrorFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.action,
            self.entity_type,
            self.entity_id.as_deref().unwrap_or("-"),
            self.message
        )
    }
}

#[derive(Debug, Clone)]
struct ThrottleEntry {
    count: u32,
    first_occurrence_at: Instant,
    last_occurrence_at: Instant,
}

impl ThrottleEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 1,
            first_occurrence_at: now,
            last_occurrence_at: now,
        }
    }
}

/// Decides whether a repeated error event should still be reported.
///
/// The throttle never touches the error itself, only whether a log or
/// report side effect fires for it.
pub struct ErrorThrottle {
    config: ThrottleConfig,
    entries: Mutex<HashMap<String, ThrottleEntry>>,
}

impl ErrorThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Record one occurrence of `fingerprint` and report whether to emit it.
    pub fn should_log(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = match entries.entry(fingerprint.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(ThrottleEntry::fresh(now));
                return true;
            }
            Entry::Occupied(occupied) => occupied.into_mut(),
        };

        let idle = now.saturating_duration_since(entry.last_occurrence_at);
        let tracked = now.saturating_duration_since(entry.first_occurrence_at);
        if idle >= self.config.reset_window() || tracked >= self.config.tracking_window() {
            *entry = ThrottleEntry::fresh(now);
            return true;
        }

        entry.count = entry.count.saturating_add(1);
        entry.last_occurrence_at = now;
        entry.count <= self.config.max_occurrences
    }

    pub fn should_log_fingerprint(&self, fingerprint: &ErrorFingerprint) -> bool {
        self.should_log(&fingerprint.to_string())
    }

    /// Occurrences recorded for `fingerprint` in its current cycle
    pub fn occurrences(&self, fingerprint: &str) -> u32 {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn tracked_fingerprints(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

impl Sweep for ErrorThrottle {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let reset_window = self.config.reset_window();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| {
            now.saturating_duration_since(entry.last_occurrence_at) < reset_window
        });
        before - entries.len()
    }

    fn label(&self) -> &str {
        "error_throttle"
    }
}
