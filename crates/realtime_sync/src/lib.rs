pub mod domain;
pub mod nats;

pub use domain::*;
pub use nats::*;
