//! # Authorization State Repository
//!
//! Database operations for the single-use CSRF state records that bind an
//! authorization attempt to its callback.

use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::authorization_state::{self, ActiveModel, Entity, Model};

/// Result of an atomic consume attempt.
///
/// Only `Consumed` validates a callback; the other variants exist so callers
/// can log the distinction while failing uniformly.
#[derive(Debug)]
pub enum ConsumeOutcome {
    Consumed(Model),
    Unknown,
    Expired,
    /// A racing callback deleted the row first.
    Replayed,
}

/// Repository for authorization state database operations
#[derive(Debug, Clone)]
pub struct AuthorizationStateRepository {
    db: Arc<DatabaseConnection>,
}

impl AuthorizationStateRepository {
    /// Create a new authorization state repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new authorization state record with the given TTL
    pub async fn create(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        provider_slug: &str,
        state: &str,
        redirect_uri: Option<String>,
        ttl_minutes: i64,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();
        let id = Uuid::new_v4();

        let new_state = ActiveModel {
            id: Set(id),
            state: Set(state.to_string()),
            user_id: Set(user_id),
            tenant_id: Set(tenant_id),
            provider_slug: Set(provider_slug.to_string()),
            redirect_uri: Set(redirect_uri),
            created_at: Set(now),
            expires_at: Set(now + Duration::minutes(ttl_minutes)),
        };

        new_state.insert(&*self.db).await?;

        // Fetch the persisted row directly; SQLite does not reliably return
        // inserted UUID keys through last_insert_id.
        Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| sea_orm::DbErr::RecordNotFound("authorization state".to_string()))
    }

    /// Atomically consume a state token.
    ///
    /// The row is deleted by primary key after lookup; `rows_affected`
    /// decides a race between two callbacks presenting the same state, so at
    /// most one caller ever observes `Consumed`. Expired rows are removed as
    /// a side effect but never validate.
    pub async fn consume(&self, state: &str) -> Result<ConsumeOutcome, sea_orm::DbErr> {
        let Some(model) = Entity::find()
            .filter(authorization_state::Column::State.eq(state))
            .one(&*self.db)
            .await?
        else {
            return Ok(ConsumeOutcome::Unknown);
        };

        let delete = Entity::delete_by_id(model.id).exec(&*self.db).await?;
        if delete.rows_affected == 0 {
            return Ok(ConsumeOutcome::Replayed);
        }

        if model.expires_at <= Utc::now() {
            return Ok(ConsumeOutcome::Expired);
        }

        Ok(ConsumeOutcome::Consumed(model))
    }

    /// Clean up expired authorization states
    pub async fn cleanup_expired(&self) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::delete_many()
            .filter(authorization_state::Column::ExpiresAt.lt(Utc::now()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
