//! Provider adapter trait definition
//!
//! Defines the interface every provider implementation must follow, plus the
//! normalized token grant and identity types. Each provider's response shape
//! stays private to its adapter; only the normalized forms cross this
//! boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Adapter-level error types for structured error handling
#[derive(Debug, Error)]
pub enum AdapterError {
    /// HTTP error from the upstream provider
    #[error("provider returned HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    /// Provider signalled failure inside a 200 envelope (e.g. Slack's
    /// `ok: false` responses)
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// Response body did not match the provider's documented shape
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// Network or connectivity error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Authorization URL could not be constructed
    #[error("invalid provider URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Static, read-only descriptor for a configured provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique identifier for the provider (snake_case slug)
    pub slug: String,
    /// Human-readable provider name
    pub display_name: String,
    /// OAuth scopes requested during authorization
    pub scopes: Vec<String>,
    /// Browser-facing authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint used for code exchange and the refresh grant
    pub token_endpoint: String,
    /// Whether this adapter is a mock-mode stand-in for absent credentials
    pub mock: bool,
}

/// Parameters for building an authorization URL
#[derive(Debug, Clone)]
pub struct AuthorizeUrlParams {
    pub state: String,
    pub redirect_uri: String,
}

/// Normalized result of a code exchange or refresh grant.
///
/// `refresh_token` is `Some` only when the provider issued (or rotated) one;
/// callers preserve the previously stored refresh token otherwise.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub scopes: Vec<String>,
}

/// Normalized identity extracted from a provider's own response shape
#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    /// Identity of the user on the provider side
    pub provider_user_id: String,
    /// Workspace/team identifier for multi-workspace providers
    pub provider_team_id: Option<String>,
    /// Email, when the provider's surface exposes one
    pub email: Option<String>,
    /// Display name, when available
    pub display_name: Option<String>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Static descriptor for this provider.
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Build the browser-facing authorization URL. Implementations must
    /// request offline access and forced consent where the provider
    /// distinguishes them, so a refresh token is always issued.
    fn authorize_url(&self, params: &AuthorizeUrlParams) -> Result<Url, AdapterError>;

    /// Exchange an authorization code for tokens plus the user's identity,
    /// normalized from this provider's response shape.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<(TokenGrant, ProviderIdentity), AdapterError>;

    /// Perform the refresh grant for an existing connection.
    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError>;

    /// Minimal liveness probe against the provider's identity surface.
    async fn ping(&self, access_token: &str) -> Result<(), AdapterError>;
}

impl TokenGrant {
    /// Split a space- or comma-separated scope string into a list.
    pub fn parse_scope_string(scope: &str) -> Vec<String> {
        scope
            .split([' ', ','])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scope_string_handles_both_separators() {
        assert_eq!(
            TokenGrant::parse_scope_string("email profile"),
            vec!["email", "profile"]
        );
        assert_eq!(
            TokenGrant::parse_scope_string("channels:read,users:read"),
            vec!["channels:read", "users:read"]
        );
        assert!(TokenGrant::parse_scope_string("").is_empty());
    }
}
