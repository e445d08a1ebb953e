pub mod domain;
pub mod postgrest;

pub use domain::*;
pub use postgrest::*;
