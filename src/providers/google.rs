//! Google provider adapter
//!
//! Implements the OAuth2 authorization-code flow against Google's endpoints.
//! Google's token-exchange response carries no identity, so a secondary
//! userinfo call resolves the account after exchange. Google does not rotate
//! refresh tokens on the refresh grant, so `refresh_grant` normally returns
//! `refresh_token: None` and the stored one is preserved.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::providers::adapter::{
    AdapterError, AuthorizeUrlParams, ProviderAdapter, ProviderDescriptor, ProviderIdentity,
    TokenGrant,
};

pub const GOOGLE_PROVIDER_SLUG: &str = "google";

pub const DEFAULT_GOOGLE_SCOPES: &[&str] = &[
    "openid",
    "email",
    "profile",
    "https://www.googleapis.com/auth/gmail.readonly",
];

/// Google adapter configuration
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base for the browser-facing authorization endpoint
    pub oauth_base: String,
    /// Base for the token and userinfo endpoints
    pub api_base: String,
}

/// Google provider adapter
pub struct GoogleAdapter {
    config: GoogleConfig,
    descriptor: ProviderDescriptor,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

impl GoogleAdapter {
    pub fn new(config: GoogleConfig) -> Self {
        let descriptor = ProviderDescriptor {
            slug: GOOGLE_PROVIDER_SLUG.to_string(),
            display_name: "Google".to_string(),
            scopes: DEFAULT_GOOGLE_SCOPES.iter().map(|s| s.to_string()).collect(),
            authorization_endpoint: format!("{}/o/oauth2/v2/auth", config.oauth_base),
            token_endpoint: format!("{}/token", config.api_base),
            mock: false,
        };

        Self {
            config,
            descriptor,
            http: reqwest::Client::new(),
        }
    }

    fn userinfo_endpoint(&self) -> String {
        format!("{}/userinfo", self.config.api_base)
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<GoogleTokenResponse, AdapterError> {
        let response = self
            .http
            .post(&self.descriptor.token_endpoint)
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = extract_oauth_error(response.text().await.unwrap_or_default());
            return Err(AdapterError::Http { status, detail });
        }

        response
            .json::<GoogleTokenResponse>()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<GoogleUserInfo, AdapterError> {
        let response = self
            .http
            .get(self.userinfo_endpoint())
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(AdapterError::Http {
                status,
                detail: "userinfo request failed".to_string(),
            });
        }

        response
            .json::<GoogleUserInfo>()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))
    }
}

impl From<GoogleTokenResponse> for TokenGrant {
    fn from(response: GoogleTokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: response.expires_in,
            scopes: response
                .scope
                .as_deref()
                .map(TokenGrant::parse_scope_string)
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn authorize_url(&self, params: &AuthorizeUrlParams) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&self.descriptor.authorization_endpoint)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &params.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.descriptor.scopes.join(" "))
            .append_pair("state", &params.state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<(TokenGrant, ProviderIdentity), AdapterError> {
        let token_response = self
            .request_token(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        // Google embeds no identity in the token response; resolve it with
        // a secondary userinfo call.
        let userinfo = self.fetch_userinfo(&token_response.access_token).await?;
        debug!(provider_user_id = %userinfo.sub, "Resolved Google identity");

        let identity = ProviderIdentity {
            provider_user_id: userinfo.sub,
            provider_team_id: None,
            email: userinfo.email,
            display_name: userinfo.name,
        };

        Ok((token_response.into(), identity))
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError> {
        let token_response = self
            .request_token(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        Ok(token_response.into())
    }

    async fn ping(&self, access_token: &str) -> Result<(), AdapterError> {
        self.fetch_userinfo(access_token).await.map(|_| ())
    }
}

/// Pull the `error` field out of an OAuth error body, falling back to a
/// truncated raw body.
fn extract_oauth_error(body: String) -> String {
    #[derive(Deserialize)]
    struct OAuthErrorBody {
        error: String,
        error_description: Option<String>,
    }

    match serde_json::from_str::<OAuthErrorBody>(&body) {
        Ok(parsed) => match parsed.error_description {
            Some(description) => format!("{}: {}", parsed.error, description),
            None => parsed.error,
        },
        Err(_) => body.chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GoogleAdapter {
        GoogleAdapter::new(GoogleConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            oauth_base: "https://accounts.google.com".to_string(),
            api_base: "https://oauth2.googleapis.com".to_string(),
        })
    }

    #[test]
    fn authorize_url_requests_offline_access_and_consent() {
        let url = adapter()
            .authorize_url(&AuthorizeUrlParams {
                state: "state-123".to_string(),
                redirect_uri: "https://localhost:8080/callback".to_string(),
            })
            .expect("builds URL");

        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        assert_eq!(url.scheme(), "https");
        assert!(query.contains(&("access_type".to_string(), "offline".to_string())));
        assert!(query.contains(&("prompt".to_string(), "consent".to_string())));
        assert!(query.contains(&("state".to_string(), "state-123".to_string())));

        let scope = query
            .iter()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.clone())
            .expect("scope present");
        for expected in DEFAULT_GOOGLE_SCOPES {
            assert!(scope.contains(expected));
        }
    }

    #[test]
    fn extract_oauth_error_prefers_structured_body() {
        let detail = extract_oauth_error(
            r#"{"error":"invalid_grant","error_description":"Code was already redeemed."}"#
                .to_string(),
        );
        assert_eq!(detail, "invalid_grant: Code was already redeemed.");

        let fallback = extract_oauth_error("plain text".to_string());
        assert_eq!(fallback, "plain text");
    }
}
