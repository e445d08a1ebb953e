pub mod consistency_manager;
pub mod in_memory_query_cache;
pub mod invalidation;
pub mod realtime_config;

pub use consistency_manager::*;
pub use in_memory_query_cache::*;
pub use invalidation::*;
pub use realtime_config::*;
