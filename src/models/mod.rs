//! # Data Models
//!
//! This module contains all the data models used throughout the Connections API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod authorization_state;
pub mod connection;

pub use authorization_state::Entity as AuthorizationState;
pub use connection::Entity as Connection;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "relay-connections".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
