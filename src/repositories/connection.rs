//! Connection repository for database operations
//!
//! This module provides the ConnectionRepository struct which encapsulates
//! SeaORM operations for the connections table. Token material only passes
//! through here in encrypted form; encryption and decryption are delegated
//! to the injected [`TokenVault`].

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::TokenVault;
use crate::error::ConnectionError;
use crate::models::connection::{self, ConnectionStatus, Entity as Connection};

/// Filters for admin listings
#[derive(Debug, Default, Clone)]
pub struct ConnectionFilter {
    pub provider_slug: Option<String>,
    pub status: Option<String>,
    pub user_id: Option<Uuid>,
}

/// Per-tenant connection statistics for the admin surface
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_provider: BTreeMap<String, u64>,
}

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: Arc<DatabaseConnection>,
    vault: TokenVault,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: Arc<DatabaseConnection>, vault: TokenVault) -> Self {
        Self { db, vault }
    }

    fn aad_for(connection: &connection::Model) -> String {
        TokenVault::aad(
            &connection.user_id,
            &connection.tenant_id,
            &connection.provider_slug,
            &connection.provider_user_id,
        )
    }

    /// Encrypt a token pair under a connection tuple's AAD.
    pub fn encrypt_tokens(
        &self,
        user_id: &Uuid,
        tenant_id: &Uuid,
        provider_slug: &str,
        provider_user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), ConnectionError> {
        let aad = TokenVault::aad(user_id, tenant_id, provider_slug, provider_user_id);
        let access = self.vault.encrypt_token(&aad, access_token)?;
        let refresh = refresh_token
            .map(|token| self.vault.encrypt_token(&aad, token))
            .transpose()?;
        Ok((access, refresh))
    }

    /// Decrypt the stored access token. Fails closed on any integrity error.
    pub fn decrypt_access_token(
        &self,
        connection: &connection::Model,
    ) -> Result<String, ConnectionError> {
        let ciphertext = connection
            .access_token_ciphertext
            .as_deref()
            .ok_or(ConnectionError::ConnectionNotFound)?;

        self.vault
            .decrypt_token(&Self::aad_for(connection), ciphertext)
            .map_err(|err| {
                tracing::error!(
                    connection_id = %connection.id,
                    provider_slug = %connection.provider_slug,
                    "Access token decryption failed"
                );
                ConnectionError::Decryption(err)
            })
    }

    /// Decrypt the stored refresh token, if any.
    pub fn decrypt_refresh_token(
        &self,
        connection: &connection::Model,
    ) -> Result<Option<String>, ConnectionError> {
        let Some(ciphertext) = connection.refresh_token_ciphertext.as_deref() else {
            return Ok(None);
        };

        self.vault
            .decrypt_token(&Self::aad_for(connection), ciphertext)
            .map(Some)
            .map_err(|err| {
                tracing::error!(
                    connection_id = %connection.id,
                    provider_slug = %connection.provider_slug,
                    "Refresh token decryption failed"
                );
                ConnectionError::Decryption(err)
            })
    }

    /// Retrieves a connection by its ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<connection::Model>, ConnectionError> {
        Ok(Connection::find_by_id(*id).one(&*self.db).await?)
    }

    /// Finds a connection by its unique
    /// (user, tenant, provider, provider user) tuple, regardless of status
    pub async fn find_by_identity(
        &self,
        user_id: &Uuid,
        tenant_id: &Uuid,
        provider_slug: &str,
        provider_user_id: &str,
    ) -> Result<Option<connection::Model>, ConnectionError> {
        Ok(Connection::find()
            .filter(connection::Column::UserId.eq(*user_id))
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .filter(connection::Column::ProviderSlug.eq(provider_slug))
            .filter(connection::Column::ProviderUserId.eq(provider_user_id))
            .one(&*self.db)
            .await?)
    }

    /// Locates the active connection serving a (user, tenant, provider)
    /// tuple. `provider_team_id` disambiguates multi-workspace providers;
    /// without it the most recently updated active connection wins.
    pub async fn find_active(
        &self,
        user_id: &Uuid,
        tenant_id: &Uuid,
        provider_slug: &str,
        provider_team_id: Option<&str>,
    ) -> Result<Option<connection::Model>, ConnectionError> {
        let mut query = Connection::find()
            .filter(connection::Column::UserId.eq(*user_id))
            .filter(connection::Column::TenantId.eq(*tenant_id))
            .filter(connection::Column::ProviderSlug.eq(provider_slug))
            .filter(connection::Column::Status.eq(ConnectionStatus::Active.as_str()));

        if let Some(team_id) = provider_team_id {
            query = query.filter(connection::Column::ProviderTeamId.eq(team_id));
        }

        Ok(query
            .order_by_desc(connection::Column::UpdatedAt)
            .one(&*self.db)
            .await?)
    }

    /// Creates a new connection record
    pub async fn create(
        &self,
        connection: connection::ActiveModel,
    ) -> Result<connection::Model, ConnectionError> {
        let id = connection
            .id
            .clone()
            .take()
            .ok_or_else(|| sea_orm::DbErr::Custom("connection id must be set".to_string()))?;

        connection.insert(&*self.db).await?;

        // SQLite does not reliably return inserted UUID keys; fetch the row.
        let fetched = Connection::find_by_id(id).one(&*self.db).await?;
        fetched.ok_or_else(|| {
            ConnectionError::Db(sea_orm::DbErr::RecordNotFound(
                "connection not persisted".to_string(),
            ))
        })
    }

    /// Partial update for token/status/expiry mutations after a callback or
    /// refresh. `refresh_token_ciphertext: None` preserves the stored value
    /// for providers that do not rotate refresh tokens.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_tokens(
        &self,
        id: &Uuid,
        access_token_ciphertext: Vec<u8>,
        refresh_token_ciphertext: Option<Vec<u8>>,
        expires_at: Option<DateTime<Utc>>,
        scopes: Option<serde_json::Value>,
        status: ConnectionStatus,
        last_refreshed_at: Option<DateTime<Utc>>,
    ) -> Result<connection::Model, ConnectionError> {
        let existing = Connection::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound)?;

        let mut model: connection::ActiveModel = existing.into();

        model.access_token_ciphertext = Set(Some(access_token_ciphertext));
        if let Some(cipher) = refresh_token_ciphertext {
            model.refresh_token_ciphertext = Set(Some(cipher));
        }
        if let Some(expires_at) = expires_at {
            let fixed: DateTimeWithTimeZone = expires_at.into();
            model.expires_at = Set(Some(fixed));
        }
        if let Some(scopes) = scopes {
            model.scopes = Set(Some(scopes));
        }
        if let Some(refreshed_at) = last_refreshed_at {
            model.last_refreshed_at = Set(Some(refreshed_at.into()));
        }
        model.status = Set(status.as_str().to_string());
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Update a connection in place after a repeat authorization callback.
    /// Fresh identity metadata and token material replace the stored values;
    /// `refresh_token_ciphertext: None` preserves the existing refresh token.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_from_callback(
        &self,
        id: &Uuid,
        email: &str,
        provider_team_id: Option<String>,
        token_type: &str,
        access_token_ciphertext: Vec<u8>,
        refresh_token_ciphertext: Option<Vec<u8>>,
        expires_at: Option<DateTime<Utc>>,
        scopes: Option<serde_json::Value>,
    ) -> Result<connection::Model, ConnectionError> {
        let existing = Connection::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound)?;

        let mut model: connection::ActiveModel = existing.into();

        model.email = Set(email.to_string());
        if provider_team_id.is_some() {
            model.provider_team_id = Set(provider_team_id);
        }
        model.token_type = Set(token_type.to_string());
        model.access_token_ciphertext = Set(Some(access_token_ciphertext));
        if let Some(cipher) = refresh_token_ciphertext {
            model.refresh_token_ciphertext = Set(Some(cipher));
        }
        model.expires_at = Set(expires_at.map(Into::into));
        if let Some(scopes) = scopes {
            model.scopes = Set(Some(scopes));
        }
        model.status = Set(ConnectionStatus::Active.as_str().to_string());
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Flip a connection's lifecycle status
    pub async fn mark_status(
        &self,
        id: &Uuid,
        status: ConnectionStatus,
    ) -> Result<connection::Model, ConnectionError> {
        let existing = Connection::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound)?;

        let mut model: connection::ActiveModel = existing.into();
        model.status = Set(status.as_str().to_string());
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Revoke a connection, stamping the audit trail. The row is retained.
    pub async fn revoke(
        &self,
        id: &Uuid,
        revoked_by: &str,
        reason: Option<String>,
    ) -> Result<connection::Model, ConnectionError> {
        let existing = Connection::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound)?;

        let now = Utc::now();
        let mut model: connection::ActiveModel = existing.into();
        model.status = Set(ConnectionStatus::Revoked.as_str().to_string());
        model.revoked_at = Set(Some(now.into()));
        model.revoked_by = Set(Some(revoked_by.to_string()));
        model.revoke_reason = Set(reason);
        model.updated_at = Set(now.into());

        Ok(model.update(&*self.db).await?)
    }

    /// Record a health check result onto the connection's health fields
    pub async fn record_health(
        &self,
        id: &Uuid,
        healthy: bool,
        error: Option<String>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), ConnectionError> {
        let existing = Connection::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound)?;

        let mut model: connection::ActiveModel = existing.into();
        model.last_health_check_at = Set(Some(checked_at.into()));
        model.health_check_status = Set(Some(
            if healthy { "healthy" } else { "unhealthy" }.to_string(),
        ));
        model.health_check_error = Set(error);

        model.update(&*self.db).await?;
        Ok(())
    }

    /// Active connections holding a refresh token whose expiry falls inside
    /// the lookahead window, ordered soonest-first
    pub async fn find_expiring(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<connection::Model>, ConnectionError> {
        let cutoff_db: DateTimeWithTimeZone = cutoff.into();

        Ok(Connection::find()
            .filter(connection::Column::Status.eq(ConnectionStatus::Active.as_str()))
            .filter(connection::Column::RefreshTokenCiphertext.is_not_null())
            .filter(
                connection::Column::ExpiresAt
                    .is_not_null()
                    .and(connection::Column::ExpiresAt.lte(cutoff_db)),
            )
            .order_by_asc(connection::Column::ExpiresAt)
            .all(&*self.db)
            .await?)
    }

    /// All active connections (health sweep input)
    pub async fn find_all_active(&self) -> Result<Vec<connection::Model>, ConnectionError> {
        Ok(Connection::find()
            .filter(connection::Column::Status.eq(ConnectionStatus::Active.as_str()))
            .order_by_asc(connection::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Tenant-scoped listing with optional filters, newest first
    pub async fn list_by_tenant(
        &self,
        tenant_id: &Uuid,
        filter: &ConnectionFilter,
    ) -> Result<Vec<connection::Model>, ConnectionError> {
        let mut query = Connection::find().filter(connection::Column::TenantId.eq(*tenant_id));

        if let Some(ref provider) = filter.provider_slug {
            query = query.filter(connection::Column::ProviderSlug.eq(provider.as_str()));
        }
        if let Some(ref status) = filter.status {
            query = query.filter(connection::Column::Status.eq(status.as_str()));
        }
        if let Some(user_id) = filter.user_id {
            query = query.filter(connection::Column::UserId.eq(user_id));
        }

        Ok(query
            .order_by_desc(connection::Column::CreatedAt)
            .order_by_desc(connection::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Tenant-scoped statistics grouped by status and provider
    pub async fn stats_by_tenant(
        &self,
        tenant_id: &Uuid,
    ) -> Result<ConnectionStats, ConnectionError> {
        let connections = self
            .list_by_tenant(tenant_id, &ConnectionFilter::default())
            .await?;

        let mut stats = ConnectionStats {
            total: connections.len() as u64,
            ..Default::default()
        };

        for connection in &connections {
            *stats.by_status.entry(connection.status.clone()).or_insert(0) += 1;
            *stats
                .by_provider
                .entry(connection.provider_slug.clone())
                .or_insert(0) += 1;
        }

        Ok(stats)
    }
}
