use common::domain::Actor;
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use depot_resilience::{RateLimitConfig, RateLimitersConfig, RetryPolicyConfig, ThrottleConfig};
use realtime_sync::RealtimeConfig;
use serde::{Deserialize, Serialize};
use shipment_api::PostgrestConfig;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of plain text
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subject prefix under which change notifications are published
    #[serde(default = "default_change_subject_prefix")]
    pub change_subject_prefix: String,

    /// Topic whose changes keep the document views fresh
    #[serde(default = "default_realtime_topic")]
    pub realtime_topic: String,

    /// Request/reply subject accepting transition commands
    #[serde(default = "default_command_subject")]
    pub command_subject: String,

    // Backend RPC configuration
    #[serde(default = "default_postgrest_url")]
    pub postgrest_url: String,

    #[serde(default)]
    pub postgrest_api_key: Option<String>,

    #[serde(default)]
    pub postgrest_access_token: Option<String>,

    #[serde(default = "default_postgrest_timeout_secs")]
    pub postgrest_timeout_secs: u64,

    /// Actor on whose behalf transition commands run; commands are refused when unset
    #[serde(default)]
    pub service_actor_id: Option<String>,

    #[serde(default = "default_service_actor_role")]
    pub service_actor_role: String,

    // Retry configuration
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    // Realtime reconnect configuration
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,

    /// Channel silence after which views fall back to polling
    #[serde(default = "default_stale_horizon_secs")]
    pub stale_horizon_secs: u64,

    /// Cached views untouched for this long are evicted
    #[serde(default = "default_cache_retention_secs")]
    pub cache_retention_secs: u64,

    // Rate limit configuration
    #[serde(default = "default_api_rate_limit_max_requests")]
    pub api_rate_limit_max_requests: u32,

    #[serde(default = "default_api_rate_limit_window_secs")]
    pub api_rate_limit_window_secs: u64,

    #[serde(default = "default_auth_rate_limit_max_requests")]
    pub auth_rate_limit_max_requests: u32,

    #[serde(default = "default_auth_rate_limit_window_secs")]
    pub auth_rate_limit_window_secs: u64,

    #[serde(default = "default_sensitive_rate_limit_max_requests")]
    pub sensitive_rate_limit_max_requests: u32,

    #[serde(default = "default_sensitive_rate_limit_window_secs")]
    pub sensitive_rate_limit_window_secs: u64,

    // Error throttle configuration
    #[serde(default = "default_throttle_tracking_window_secs")]
    pub throttle_tracking_window_secs: u64,

    #[serde(default = "default_throttle_max_occurrences")]
    pub throttle_max_occurrences: u32,

    #[serde(default = "default_throttle_reset_window_secs")]
    pub throttle_reset_window_secs: u64,

    /// How often expired rate-limit and throttle entries are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on graceful shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json_logs() -> bool {
    true
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "depot-all-in-one".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_change_subject_prefix() -> String {
    "depot.changes".to_string()
}

fn default_realtime_topic() -> String {
    "documents".to_string()
}

fn default_command_subject() -> String {
    "depot.commands.transition".to_string()
}

fn default_postgrest_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_postgrest_timeout_secs() -> u64 {
    15
}

fn default_service_actor_role() -> String {
    "service".to_string()
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_secs() -> u64 {
    30
}

fn default_stale_horizon_secs() -> u64 {
    120
}

fn default_cache_retention_secs() -> u64 {
    10 * 60
}

fn default_api_rate_limit_max_requests() -> u32 {
    100
}

fn default_api_rate_limit_window_secs() -> u64 {
    60
}

fn default_auth_rate_limit_max_requests() -> u32 {
    5
}

fn default_auth_rate_limit_window_secs() -> u64 {
    15 * 60
}

fn default_sensitive_rate_limit_max_requests() -> u32 {
    10
}

fn default_sensitive_rate_limit_window_secs() -> u64 {
    60
}

fn default_throttle_tracking_window_secs() -> u64 {
    60
}

fn default_throttle_max_occurrences() -> u32 {
    3
}

fn default_throttle_reset_window_secs() -> u64 {
    5 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("DEPOT"))
            .build()?
            .try_deserialize()
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
            json_logs: self.json_logs,
        }
    }

    pub fn postgrest_config(&self) -> PostgrestConfig {
        PostgrestConfig {
            base_url: self.postgrest_url.clone(),
            api_key: self.postgrest_api_key.clone(),
            access_token: self.postgrest_access_token.clone(),
            request_timeout_secs: self.postgrest_timeout_secs,
        }
    }

    pub fn service_actor(&self) -> Option<Actor> {
        self.service_actor_id
            .as_ref()
            .filter(|id| !id.is_empty())
            .map(|id| Actor::new(id.clone(), self.service_actor_role.clone()))
    }

    pub fn retry_policy_config(&self) -> RetryPolicyConfig {
        RetryPolicyConfig {
            max_attempts: self.retry_max_attempts,
            base_delay_ms: self.retry_base_delay_ms,
        }
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            reconnect_base_delay_ms: self.reconnect_base_delay_ms,
            reconnect_max_delay_secs: self.reconnect_max_delay_secs,
        }
    }

    pub fn rate_limiters_config(&self) -> RateLimitersConfig {
        RateLimitersConfig {
            api: RateLimitConfig {
                max_requests: self.api_rate_limit_max_requests,
                window_secs: self.api_rate_limit_window_secs,
            },
            auth: RateLimitConfig {
                max_requests: self.auth_rate_limit_max_requests,
                window_secs: self.auth_rate_limit_window_secs,
            },
            sensitive: RateLimitConfig {
                max_requests: self.sensitive_rate_limit_max_requests,
                window_secs: self.sensitive_rate_limit_window_secs,
            },
        }
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            tracking_window_secs: self.throttle_tracking_window_secs,
            max_occurrences: self.throttle_max_occurrences,
            reset_window_secs: self.throttle_reset_window_secs,
        }
    }

    pub fn stale_horizon(&self) -> Duration {
        Duration::from_secs(self.stale_horizon_secs)
    }

    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.cache_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
