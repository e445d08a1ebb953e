use depot_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Delay before the first reconnect attempt; doubles per consecutive failure (default: 1000ms)
    pub reconnect_base_delay_ms: u64,

    /// Upper bound on the reconnect delay (default: 30 seconds)
    pub reconnect_max_delay_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_secs: 30,
        }
    }
}

impl RealtimeConfig {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    /// Wait before reconnecting after `consecutive_failures` failed sessions.
    pub fn reconnect_delay(&self, consecutive_failures: u32) -> Duration {
        RetryPolicy::new(u32::MAX, self.reconnect_base_delay())
            .delay_before_attempt(consecutive_failures.saturating_add(1))
            .min(self.reconnect_max_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_doubles_then_caps() {
        let config = RealtimeConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(config.reconnect_delay(5), Duration::from_secs(16));
        assert_eq!(config.reconnect_delay(6), Duration::from_secs(30));
        assert_eq!(config.reconnect_delay(40), Duration::from_secs(30));
    }
}
