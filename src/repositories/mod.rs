//! # Repositories
//!
//! Database access layers for the Connections API entities.

pub mod authorization_state;
pub mod connection;

pub use authorization_state::{AuthorizationStateRepository, ConsumeOutcome};
pub use connection::{ConnectionFilter, ConnectionRepository, ConnectionStats};
