//! Connection entity model
//!
//! This module contains the SeaORM entity model for the connections table,
//! which stores encrypted OAuth credential sets per (user, tenant, provider,
//! provider user) tuple, along with lifecycle and health-check state.

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Connection lifecycle status.
///
/// `Expired` is derived from `expires_at` at read time; it is stored only
/// when an observer (e.g. a health check) wants to materialize the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    Expired,
    Error,
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Expired => "expired",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ConnectionStatus::Active),
            "expired" => Some(ConnectionStatus::Expired),
            "error" => Some(ConnectionStatus::Error),
            "revoked" => Some(ConnectionStatus::Revoked),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection entity representing a stored OAuth credential set
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Platform user the connection belongs to
    pub user_id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Slug of the provider this connection authorizes against
    pub provider_slug: String,

    /// Identity of the user on the provider side
    pub provider_user_id: String,

    /// Workspace/team identifier for multi-workspace providers
    pub provider_team_id: Option<String>,

    /// Email reported by the provider's identity surface
    pub email: String,

    /// Lifecycle status (active|expired|error|revoked)
    pub status: String,

    /// Encrypted access token ciphertext
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// Encrypted refresh token ciphertext
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// OAuth token type, normally "Bearer"
    pub token_type: String,

    /// Access token expiry
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Granted OAuth scopes, stored as a JSON array
    #[sea_orm(column_type = "JsonBinary")]
    pub scopes: Option<JsonValue>,

    /// Timestamp when the connection was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the connection was last updated
    pub updated_at: DateTimeWithTimeZone,

    /// Timestamp of the last successful token refresh
    pub last_refreshed_at: Option<DateTimeWithTimeZone>,

    /// Revocation audit trail
    pub revoked_at: Option<DateTimeWithTimeZone>,
    pub revoked_by: Option<String>,
    pub revoke_reason: Option<String>,

    /// Health monitoring results, written by the health monitor only
    pub last_health_check_at: Option<DateTimeWithTimeZone>,
    pub health_check_status: Option<String>,
    pub health_check_error: Option<String>,
}

impl Model {
    /// Parsed lifecycle status; unknown values read as `Error`.
    pub fn lifecycle_status(&self) -> ConnectionStatus {
        ConnectionStatus::parse(&self.status).unwrap_or(ConnectionStatus::Error)
    }

    /// Whether the stored access token has passed its expiry at `now`.
    /// A connection without an expiry never counts as expired.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires| expires.with_timezone(&Utc) <= now)
            .unwrap_or(false)
    }

    /// Granted scopes as a plain string list.
    pub fn scope_list(&self) -> Vec<String> {
        self.scopes
            .as_ref()
            .and_then(|value| value.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(expires_at: Option<DateTime<Utc>>, status: &str) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider_slug: "google".to_string(),
            provider_user_id: "google-user-1".to_string(),
            provider_team_id: None,
            email: "person@example.com".to_string(),
            status: status.to_string(),
            access_token_ciphertext: None,
            refresh_token_ciphertext: None,
            token_type: "Bearer".to_string(),
            expires_at: expires_at.map(Into::into),
            scopes: Some(serde_json::json!(["email", "profile"])),
            created_at: now.into(),
            updated_at: now.into(),
            last_refreshed_at: None,
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
            last_health_check_at: None,
            health_check_status: None,
            health_check_error: None,
        }
    }

    #[test]
    fn token_expiry_is_derived_from_expires_at() {
        let now = Utc::now();
        let live = sample(Some(now + Duration::hours(1)), "active");
        let stale = sample(Some(now - Duration::seconds(1)), "active");
        let unbounded = sample(None, "active");

        assert!(!live.is_token_expired(now));
        assert!(stale.is_token_expired(now));
        assert!(!unbounded.is_token_expired(now));
    }

    #[test]
    fn unknown_status_reads_as_error() {
        let model = sample(None, "weird");
        assert_eq!(model.lifecycle_status(), ConnectionStatus::Error);
    }

    #[test]
    fn scope_list_flattens_json_array() {
        let model = sample(None, "active");
        assert_eq!(model.scope_list(), vec!["email", "profile"]);
    }
}
