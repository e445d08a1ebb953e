use crate::domain::{LogLevel, LogSink};
use tracing::{debug, error, info, warn};

/// [`LogSink`] that forwards events to the installed tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, level: LogLevel, message: &str, context: &serde_json::Value) {
        match level {
            LogLevel::Debug => debug!(context = %context, "{}", message),
            LogLevel::Info => info!(context = %context, "{}", message),
            LogLevel::Warn => warn!(context = %context, "{}", message),
            LogLevel::Error => error!(context = %context, "{}", message),
        }
    }
}
