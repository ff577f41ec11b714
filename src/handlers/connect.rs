//! # OAuth Flow Handlers
//!
//! Handlers for starting an authorization flow and completing the provider
//! callback.

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Request body for starting an authorization flow
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    /// Platform user starting the flow
    pub user_id: Uuid,
    /// Provider identifier (snake_case, e.g. "google")
    pub provider: String,
    /// Optional redirect URI override
    pub redirect_uri: Option<String>,
}

/// OAuth authorization URL response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeResponse {
    /// Complete authorization URL for user redirection.
    /// Must be HTTPS, valid per RFC 3986, max 2048 chars, no fragment.
    pub authorization_url: String,
    /// Opaque state token bound to this attempt
    pub state: String,
    /// When the state stops validating callbacks
    pub expires_at: DateTime<Utc>,
}

/// Query parameters delivered by the provider redirect
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct CallbackQuery {
    /// Authorization code issued by the provider
    pub code: Option<String>,
    /// State token from the matching authorize call
    pub state: Option<String>,
    /// Error indicator when the user denied the request
    pub error: Option<String>,
}

/// Successful callback response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CallbackResponse {
    /// Identifier of the stored connection
    #[schema(value_type = String)]
    pub connection_id: Uuid,
    /// Provider the connection authorizes against
    pub provider: String,
    /// Email reported by the provider, when available
    pub email: String,
}

/// Start an OAuth authorization flow
///
/// Mints a single-use state token with a 15-minute TTL and returns the
/// provider's authorization URL for user redirection.
#[utoipa::path(
    post,
    path = "/authorize",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Authorization URL generated successfully", body = AuthorizeResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Provider not configured", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn start_authorization(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    if let Some(ref redirect_uri) = request.redirect_uri
        && Url::parse(redirect_uri).is_err()
    {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "redirect_uri must be a valid URL",
        ));
    }

    let start = state
        .oauth
        .start_authorization(
            request.user_id,
            tenant.0,
            &request.provider,
            request.redirect_uri,
        )
        .await
        .map_err(ApiError::from)?;

    validate_authorize_url(&start.authorization_url)?;

    Ok(Json(AuthorizeResponse {
        authorization_url: start.authorization_url.to_string(),
        state: start.state,
        expires_at: start.expires_at,
    }))
}

/// Complete an OAuth callback
///
/// Validates and consumes the state token, exchanges the code for tokens and
/// upserts the connection record. Responds with JSON so it can sit behind a
/// redirect-compatible gateway page.
#[utoipa::path(
    get,
    path = "/callback",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Connection established", body = CallbackResponse),
        (status = 400, description = "Invalid or expired state, or the user denied the request", body = ApiError),
        (status = 502, description = "Provider rejected the code exchange", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<CallbackResponse>, ApiError> {
    if let Some(provider_error) = query.error {
        tracing::warn!(error = %provider_error, "Provider returned an error on callback");
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "AUTHORIZATION_DENIED",
            &format!("Provider returned error: {}", provider_error),
        ));
    }

    let (Some(code), Some(state_token)) = (query.code, query.state) else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "code and state query parameters are required",
        ));
    };

    let outcome = state
        .oauth
        .handle_callback(&code, &state_token)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(CallbackResponse {
        connection_id: outcome.connection_id,
        provider: outcome.provider,
        email: outcome.email,
    }))
}

/// Validate an authorization URL against OAuth 2.0 and security requirements
fn validate_authorize_url(url: &Url) -> Result<(), ApiError> {
    if url.scheme() != "https" {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Adapter bug: generated authorization URL must use HTTPS",
        ));
    }

    // No fragment component per OAuth 2.0 RFC 6749 section 3.1
    if url.fragment().is_some() {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Adapter bug: generated authorization URL must not include fragment component",
        ));
    }

    if url.as_str().len() > 2048 {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Adapter bug: generated authorization URL exceeds maximum length of 2048 characters",
        ));
    }

    Ok(())
}
