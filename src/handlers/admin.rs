//! # Admin Handlers
//!
//! Read-only listings, statistics and manual health-check triggers. Every
//! token field on this surface is redacted; presence is signalled with the
//! `[REDACTED]` marker and `has_*` booleans only.

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::ApiError;
use crate::health::{HealthReport, HealthStats, HealthSummary};
use crate::repositories::connection::ConnectionFilter;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

const REDACTED: &str = "[REDACTED]";

/// Query parameters for the connections listing
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListConnectionsQuery {
    /// Optional provider filter (snake_case slug)
    pub provider: Option<String>,
    /// Optional status filter (active|expired|error|revoked)
    pub status: Option<String>,
    /// Optional user filter
    pub user_id: Option<Uuid>,
}

/// Redacted connection view for the admin surface
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub user_id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_team_id: Option<String>,
    pub email: String,
    pub status: String,
    /// Redaction marker when an access token is stored, absent otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Redaction marker when a refresh token is stored, absent otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_error: Option<String>,
}

impl From<crate::models::connection::Model> for ConnectionInfo {
    fn from(model: crate::models::connection::Model) -> Self {
        let scopes = model.scope_list();
        Self {
            id: model.id,
            user_id: model.user_id,
            provider: model.provider_slug,
            provider_user_id: model.provider_user_id,
            provider_team_id: model.provider_team_id,
            email: model.email,
            status: model.status,
            access_token: model
                .access_token_ciphertext
                .as_ref()
                .map(|_| REDACTED.to_string()),
            refresh_token: model
                .refresh_token_ciphertext
                .as_ref()
                .map(|_| REDACTED.to_string()),
            has_access_token: model.access_token_ciphertext.is_some(),
            has_refresh_token: model.refresh_token_ciphertext.is_some(),
            token_type: model.token_type,
            expires_at: model.expires_at.map(|dt| dt.with_timezone(&Utc)),
            scopes,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
            last_refreshed_at: model.last_refreshed_at.map(|dt| dt.with_timezone(&Utc)),
            revoked_at: model.revoked_at.map(|dt| dt.with_timezone(&Utc)),
            revoked_by: model.revoked_by,
            last_health_check_at: model.last_health_check_at.map(|dt| dt.with_timezone(&Utc)),
            health_check_status: model.health_check_status,
            health_check_error: model.health_check_error,
        }
    }
}

/// Response wrapper for connection listings
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionInfo>,
}

/// Tenant connection statistics
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_provider: BTreeMap<String, u64>,
}

/// List connections for the tenant with optional filters
#[utoipa::path(
    get,
    path = "/admin/connections",
    security(("bearer_auth" = [])),
    params(TenantHeader, ListConnectionsQuery),
    responses(
        (status = 200, description = "Redacted connection listing", body = ConnectionsResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(query): Query<ListConnectionsQuery>,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let filter = ConnectionFilter {
        provider_slug: query.provider,
        status: query.status,
        user_id: query.user_id,
    };

    let connections = state
        .connection_repo
        .list_by_tenant(&tenant.0, &filter)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ConnectionsResponse {
        connections: connections.into_iter().map(ConnectionInfo::from).collect(),
    }))
}

/// Fetch a single connection (redacted)
#[utoipa::path(
    get,
    path = "/admin/connections/{connection_id}",
    security(("bearer_auth" = [])),
    params(
        ("connection_id" = String, Path, description = "Connection identifier"),
        TenantHeader
    ),
    responses(
        (status = 200, description = "Redacted connection detail", body = ConnectionInfo),
        (status = 404, description = "Connection not found for tenant", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn get_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let connection =
        super::tokens::require_tenant_connection(&state, &tenant.0, &connection_id).await?;

    Ok(Json(ConnectionInfo::from(connection)))
}

/// Tenant connection statistics grouped by status and provider
#[utoipa::path(
    get,
    path = "/admin/stats",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Connection statistics", body = StatsResponse)
    ),
    tag = "admin"
)]
pub async fn stats(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state
        .connection_repo
        .stats_by_tenant(&tenant.0)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(StatsResponse {
        total: stats.total,
        by_status: stats.by_status,
        by_provider: stats.by_provider,
    }))
}

/// Trigger a health check for one connection
#[utoipa::path(
    post,
    path = "/admin/health/check/{connection_id}",
    security(("bearer_auth" = [])),
    params(
        ("connection_id" = String, Path, description = "Connection identifier"),
        TenantHeader
    ),
    responses(
        (status = 200, description = "Health check result", body = HealthReport),
        (status = 404, description = "Connection not found for tenant", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn health_check_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<HealthReport>, ApiError> {
    super::tokens::require_tenant_connection(&state, &tenant.0, &connection_id).await?;

    let report = state
        .health
        .check_connection(&connection_id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(report))
}

/// Trigger a health sweep over all active connections
#[utoipa::path(
    post,
    path = "/admin/health/check-all",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Aggregated sweep result", body = HealthSummary)
    ),
    tag = "admin"
)]
pub async fn health_check_all(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<HealthSummary>, ApiError> {
    let summary = state.health.check_all().await.map_err(ApiError::from)?;

    Ok(Json(summary))
}

/// Tenant health statistics from the persisted health fields
#[utoipa::path(
    get,
    path = "/admin/health/stats",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Health statistics", body = HealthStats)
    ),
    tag = "admin"
)]
pub async fn health_stats(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<HealthStats>, ApiError> {
    let stats = state.health.stats(&tenant.0).await.map_err(ApiError::from)?;

    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_model() -> crate::models::connection::Model {
        let now = Utc::now();
        crate::models::connection::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider_slug: "google".to_string(),
            provider_user_id: "google-user-1".to_string(),
            provider_team_id: None,
            email: "person@example.com".to_string(),
            status: "active".to_string(),
            access_token_ciphertext: Some(vec![1, 2, 3]),
            refresh_token_ciphertext: None,
            token_type: "Bearer".to_string(),
            expires_at: Some((now + Duration::hours(1)).into()),
            scopes: Some(serde_json::json!(["email"])),
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
    fn connection_info_redacts_token_material() {
        let info = ConnectionInfo::from(sample_model());

        assert_eq!(info.access_token.as_deref(), Some(REDACTED));
        assert!(info.refresh_token.is_none());
        assert!(info.has_access_token);
        assert!(!info.has_refresh_token);

        let serialized = serde_json::to_string(&info).expect("serializes");
        assert!(!serialized.contains("ciphertext"));
        assert!(serialized.contains(REDACTED));
    }
}
