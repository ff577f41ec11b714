//! # Authorization State Model
//!
//! Entity for the short-lived, single-use CSRF binding between an
//! authorization attempt and its callback.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization state entity
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "authorization_states")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Opaque random token bound to the authorization attempt
    pub state: String,

    /// Platform user starting the flow
    pub user_id: Uuid,

    /// Tenant that owns this state
    pub tenant_id: Uuid,

    /// Provider the flow targets (e.g. "google", "slack")
    pub provider_slug: String,

    /// Redirect URI override requested at authorize time
    pub redirect_uri: Option<String>,

    /// When the state was created
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Hard expiry; the state must not validate any callback after this
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
