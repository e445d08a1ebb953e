mod config;
mod init;
mod tracing_log_sink;

pub use config::*;
pub use init::*;
pub use tracing_log_sink::*;
