pub mod config;
pub mod transition_oracle;

pub use config::*;
pub use transition_oracle::*;
