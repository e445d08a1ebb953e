pub mod status_transition_gateway;

pub use status_transition_gateway::*;
