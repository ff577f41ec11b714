//! # Error Handling
//!
//! This module provides unified error handling for the Connections API:
//! the domain-level [`ConnectionError`] taxonomy for the OAuth lifecycle,
//! and the [`ApiError`] problem+json response envelope with trace ID
//! propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::crypto::CryptoError;
use crate::telemetry;

/// Domain errors for the OAuth connection lifecycle.
///
/// Token material must never appear in any variant's message.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Provider has no registered adapter; permanent until configured.
    #[error("provider '{provider}' is not configured")]
    NotConfigured { provider: String },

    /// Callback presented a state that is unknown, expired, or already
    /// consumed. Deliberately uniform so the response is not an existence
    /// oracle; internal logs distinguish the cases.
    #[error("authorization state is invalid or expired")]
    InvalidOrExpiredState,

    /// Provider rejected the authorization code exchange.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Vault integrity failure. Must alarm and never yield a token.
    #[error("stored token could not be decrypted")]
    Decryption(#[from] CryptoError),

    /// Connection holds no refresh token; the user must re-authorize.
    #[error("connection has no refresh token; re-authorization required")]
    NoRefreshToken,

    /// Refresh grant failed; the connection has been moved to error status.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// No active connection matches the requested tuple.
    #[error("no active connection found")]
    ConnectionNotFound,

    #[error("database error")]
    Db(#[from] sea_orm::DbErr),
}

impl ConnectionError {
    /// SCREAMING_SNAKE error code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ConnectionError::NotConfigured { .. } => "NOT_CONFIGURED",
            ConnectionError::InvalidOrExpiredState => "INVALID_STATE",
            ConnectionError::TokenExchange(_) => "TOKEN_EXCHANGE_FAILED",
            ConnectionError::Decryption(_) => "DECRYPTION_FAILED",
            ConnectionError::NoRefreshToken => "NO_REFRESH_TOKEN",
            ConnectionError::RefreshFailed(_) => "REFRESH_FAILED",
            ConnectionError::ConnectionNotFound => "CONNECTION_NOT_FOUND",
            ConnectionError::Db(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ConnectionError::NotConfigured { .. } => StatusCode::NOT_FOUND,
            ConnectionError::InvalidOrExpiredState => StatusCode::BAD_REQUEST,
            ConnectionError::TokenExchange(_) => StatusCode::BAD_GATEWAY,
            ConnectionError::Decryption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ConnectionError::NoRefreshToken => StatusCode::CONFLICT,
            ConnectionError::RefreshFailed(_) => StatusCode::BAD_GATEWAY,
            ConnectionError::ConnectionNotFound => StatusCode::NOT_FOUND,
            ConnectionError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ConnectionError> for ApiError {
    fn from(error: ConnectionError) -> Self {
        match &error {
            // Integrity failures are alarms, not routine request noise.
            ConnectionError::Decryption(_) => {
                tracing::error!("token vault integrity failure");
            }
            ConnectionError::Db(db_err) => {
                tracing::error!(error = ?db_err, "database error");
            }
            _ => {}
        }

        let message = match &error {
            // Internal variants get a generic message; details stay in logs.
            ConnectionError::Db(_) => "An internal error occurred".to_string(),
            ConnectionError::Decryption(_) => "Stored token could not be decrypted".to_string(),
            other => other.to_string(),
        };

        ApiError::new(error.status(), error.code(), &message)
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Extract current trace ID from the active tracing context (falls back
    /// to a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .map(|code| {
            let code = code.as_ref();
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        })
        .unwrap_or(false)
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert!(error.trace_id.is_some());
    }

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
    }

    #[test]
    fn test_content_type_header() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error");
        let response = error.into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_status_code_preservation() {
        let error = ApiError::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_connection_error_mapping() {
        let cases: Vec<(ConnectionError, StatusCode, &str)> = vec![
            (
                ConnectionError::NotConfigured {
                    provider: "google".to_string(),
                },
                StatusCode::NOT_FOUND,
                "NOT_CONFIGURED",
            ),
            (
                ConnectionError::InvalidOrExpiredState,
                StatusCode::BAD_REQUEST,
                "INVALID_STATE",
            ),
            (
                ConnectionError::TokenExchange("invalid_grant".to_string()),
                StatusCode::BAD_GATEWAY,
                "TOKEN_EXCHANGE_FAILED",
            ),
            (
                ConnectionError::NoRefreshToken,
                StatusCode::CONFLICT,
                "NO_REFRESH_TOKEN",
            ),
            (
                ConnectionError::RefreshFailed("provider said no".to_string()),
                StatusCode::BAD_GATEWAY,
                "REFRESH_FAILED",
            ),
            (
                ConnectionError::ConnectionNotFound,
                StatusCode::NOT_FOUND,
                "CONNECTION_NOT_FOUND",
            ),
        ];

        for (error, status, code) in cases {
            let api: ApiError = error.into();
            assert_eq!(api.status, status);
            assert_eq!(api.code.as_ref(), code);
        }
    }

    #[test]
    fn test_decryption_error_never_leaks_detail() {
        let inner = crate::crypto::CryptoError::DecryptionFailed("aead: tag mismatch".to_string());
        let api: ApiError = ConnectionError::Decryption(inner).into();

        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.code.as_ref(), "DECRYPTION_FAILED");
        assert!(!api.message.contains("tag mismatch"));
    }

    #[test]
    fn test_state_errors_are_uniform() {
        // Unknown and expired states must map to the same response shape.
        let unknown: ApiError = ConnectionError::InvalidOrExpiredState.into();
        let expired: ApiError = ConnectionError::InvalidOrExpiredState.into();
        assert_eq!(unknown.status, expired.status);
        assert_eq!(unknown.code, expired.code);
        assert_eq!(unknown.message, expired.message);
    }

    #[test]
    fn test_database_error_mapping() {
        let db_error = sea_orm::DbErr::RecordNotFound("test_record".to_string());
        let api_error: ApiError = db_error.into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.code, Box::from("NOT_FOUND"));
        assert!(api_error.message.contains("test_record"));
    }

    #[test]
    fn test_auth_error_helpers() {
        let auth_error = unauthorized(None);
        assert_eq!(auth_error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(auth_error.code, Box::from("UNAUTHORIZED"));
        assert_eq!(auth_error.message, Box::from("Authentication required"));

        let custom = unauthorized(Some("Invalid token"));
        assert_eq!(custom.message, Box::from("Invalid token"));
    }

    #[test]
    fn test_validation_error_with_details() {
        let field_errors = json!({ "user_id": "Must be a valid UUID" });
        let error = validation_error("Validation failed", field_errors.clone());

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.details, Some(Box::new(field_errors)));
    }
}
