//! # Token Handlers
//!
//! Handlers for the token read path and the refresh/revoke operations. The
//! `GET /token` endpoint is the one surface that intentionally returns
//! plaintext token material; everything else stays redacted.

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::{ApiError, ConnectionError};
use crate::server::AppState;
use crate::token_refresh::RefreshOutcome;
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Query parameters for the token read path
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct TokenQuery {
    /// Platform user the connection belongs to
    pub user_id: Uuid,
    /// Provider identifier (snake_case, e.g. "google")
    pub provider: String,
    /// Workspace/team disambiguator for multi-workspace providers
    pub team_id: Option<String>,
}

/// A decrypted access token ready for downstream use
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

/// Request body for revoking a connection
#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    /// Actor performing the revocation (audit trail)
    pub revoked_by: String,
    /// Optional human-readable reason
    pub reason: Option<String>,
}

/// Revocation confirmation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeResponse {
    #[schema(value_type = String)]
    pub connection_id: Uuid,
    pub status: String,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Result array of a batch refresh sweep
#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshSweepResponse {
    pub results: Vec<RefreshOutcome>,
}

/// Serve a valid access token for a (user, tenant, provider) tuple
///
/// Refreshes synchronously when the stored token has expired; otherwise the
/// cache answers, falling back to a vault decrypt.
#[utoipa::path(
    get,
    path = "/token",
    security(("bearer_auth" = [])),
    params(TenantHeader, TokenQuery),
    responses(
        (status = 200, description = "Valid access token", body = TokenResponse),
        (status = 404, description = "No active connection found", body = ApiError),
        (status = 502, description = "Synchronous refresh failed", body = ApiError)
    ),
    tag = "tokens"
)]
pub async fn get_token(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(query): Query<TokenQuery>,
) -> Result<Json<TokenResponse>, ApiError> {
    let issued = state
        .refresh
        .get_token(
            query.user_id,
            tenant.0,
            &query.provider,
            query.team_id.as_deref(),
        )
        .await
        .map_err(ApiError::from)?;

    Ok(Json(TokenResponse {
        access_token: issued.access_token,
        token_type: issued.token_type,
        expires_at: issued.expires_at,
        scopes: issued.scopes,
    }))
}

/// Manually refresh a single connection's tokens
#[utoipa::path(
    post,
    path = "/refresh/{connection_id}",
    security(("bearer_auth" = [])),
    params(
        ("connection_id" = String, Path, description = "Connection identifier"),
        TenantHeader
    ),
    responses(
        (status = 200, description = "Refresh outcome (success flag, never token material)", body = RefreshOutcome),
        (status = 404, description = "Connection not found for tenant", body = ApiError),
        (status = 409, description = "Connection holds no refresh token", body = ApiError)
    ),
    tag = "tokens"
)]
pub async fn refresh_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<RefreshOutcome>, ApiError> {
    require_tenant_connection(&state, &tenant.0, &connection_id).await?;

    let outcome = state
        .refresh
        .refresh_connection(&connection_id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(outcome))
}

/// Refresh every active connection expiring inside the lookahead window
///
/// Driven by an external scheduler. Each connection refreshes independently;
/// the response carries one outcome per connection regardless of failures.
#[utoipa::path(
    post,
    path = "/refresh/expiring",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Per-connection refresh outcomes", body = RefreshSweepResponse)
    ),
    tag = "tokens"
)]
pub async fn refresh_expiring(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<RefreshSweepResponse>, ApiError> {
    let results = state
        .refresh
        .refresh_expiring()
        .await
        .map_err(ApiError::from)?;

    Ok(Json(RefreshSweepResponse { results }))
}

/// Revoke a connection
///
/// Flips the status to revoked and stamps the audit trail; the record is
/// retained. Provider-side token revocation is not performed.
#[utoipa::path(
    post,
    path = "/revoke/{connection_id}",
    security(("bearer_auth" = [])),
    params(
        ("connection_id" = String, Path, description = "Connection identifier"),
        TenantHeader
    ),
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Connection revoked", body = RevokeResponse),
        (status = 404, description = "Connection not found for tenant", body = ApiError)
    ),
    tag = "tokens"
)]
pub async fn revoke_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(connection_id): Path<Uuid>,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    require_tenant_connection(&state, &tenant.0, &connection_id).await?;

    let revoked = state
        .oauth
        .revoke_connection(&connection_id, &request.revoked_by, request.reason)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(RevokeResponse {
        connection_id: revoked.id,
        status: revoked.status,
        revoked_at: revoked.revoked_at.map(|dt| dt.with_timezone(&Utc)),
    }))
}

/// Verify a connection exists and belongs to the request's tenant.
pub(crate) async fn require_tenant_connection(
    state: &AppState,
    tenant_id: &Uuid,
    connection_id: &Uuid,
) -> Result<crate::models::connection::Model, ApiError> {
    let connection = state
        .connection_repo
        .get_by_id(connection_id)
        .await
        .map_err(ApiError::from)?
        .filter(|connection| connection.tenant_id == *tenant_id)
        .ok_or(ConnectionError::ConnectionNotFound)
        .map_err(ApiError::from)?;

    Ok(connection)
}
