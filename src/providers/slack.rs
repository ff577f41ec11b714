//! Slack provider adapter
//!
//! Implements the OAuth2 v2 flow against Slack. Slack embeds the user and
//! workspace identity directly in the token-exchange response (`authed_user`
//! and `team`), so no secondary identity call is needed. With token rotation
//! enabled Slack returns a new refresh token on every refresh grant, so
//! `refresh_grant` surfaces the rotated token for storage.
//!
//! Slack wraps failures in a 200 response with `ok: false`; those become
//! [`AdapterError::Rejected`].

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::providers::adapter::{
    AdapterError, AuthorizeUrlParams, ProviderAdapter, ProviderDescriptor, ProviderIdentity,
    TokenGrant,
};

pub const SLACK_PROVIDER_SLUG: &str = "slack";

pub const DEFAULT_SLACK_SCOPES: &[&str] = &[
    "channels:history",
    "channels:read",
    "users:read",
    "users:read.email",
];

/// Slack adapter configuration
#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Base for the browser-facing authorization endpoint
    pub oauth_base: String,
    /// Base for the Web API (token exchange, auth.test)
    pub api_base: String,
}

/// Slack provider adapter
pub struct SlackAdapter {
    config: SlackConfig,
    descriptor: ProviderDescriptor,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SlackOauthAccessResponse {
    ok: bool,
    error: Option<String>,
    access_token: Option<String>,
    token_type: Option<String>,
    scope: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    authed_user: Option<SlackAuthedUser>,
    team: Option<SlackTeam>,
}

#[derive(Debug, Deserialize)]
struct SlackAuthedUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SlackTeam {
    id: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    error: Option<String>,
}

impl SlackAdapter {
    pub fn new(config: SlackConfig) -> Self {
        let descriptor = ProviderDescriptor {
            slug: SLACK_PROVIDER_SLUG.to_string(),
            display_name: "Slack".to_string(),
            scopes: DEFAULT_SLACK_SCOPES.iter().map(|s| s.to_string()).collect(),
            authorization_endpoint: format!("{}/oauth/v2/authorize", config.oauth_base),
            token_endpoint: format!("{}/oauth.v2.access", config.api_base),
            mock: false,
        };

        Self {
            config,
            descriptor,
            http: reqwest::Client::new(),
        }
    }

    async fn request_access(
        &self,
        params: &[(&str, &str)],
    ) -> Result<SlackOauthAccessResponse, AdapterError> {
        let response = self
            .http
            .post(&self.descriptor.token_endpoint)
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(AdapterError::Http { status, detail });
        }

        let parsed = response
            .json::<SlackOauthAccessResponse>()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;

        if !parsed.ok {
            return Err(AdapterError::Rejected(
                parsed.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        Ok(parsed)
    }

    fn grant_from(response: &SlackOauthAccessResponse) -> Result<TokenGrant, AdapterError> {
        let access_token = response
            .access_token
            .clone()
            .ok_or_else(|| AdapterError::MalformedResponse("missing access_token".to_string()))?;

        Ok(TokenGrant {
            access_token,
            refresh_token: response.refresh_token.clone(),
            token_type: response
                .token_type
                .clone()
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_in: response.expires_in,
            scopes: response
                .scope
                .as_deref()
                .map(TokenGrant::parse_scope_string)
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for SlackAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn authorize_url(&self, params: &AuthorizeUrlParams) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&self.descriptor.authorization_endpoint)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &params.redirect_uri)
            .append_pair("user_scope", &self.descriptor.scopes.join(","))
            .append_pair("state", &params.state);

        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<(TokenGrant, ProviderIdentity), AdapterError> {
        let response = self
            .request_access(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await?;

        let grant = Self::grant_from(&response)?;

        // Identity rides inside the exchange response itself.
        let authed_user = response
            .authed_user
            .as_ref()
            .ok_or_else(|| AdapterError::MalformedResponse("missing authed_user".to_string()))?;

        let identity = ProviderIdentity {
            provider_user_id: authed_user.id.clone(),
            provider_team_id: response.team.as_ref().map(|team| team.id.clone()),
            email: None,
            display_name: response.team.as_ref().and_then(|team| team.name.clone()),
        };

        Ok((grant, identity))
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError> {
        let response = self
            .request_access(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        Self::grant_from(&response)
    }

    async fn ping(&self, access_token: &str) -> Result<(), AdapterError> {
        let response = self
            .http
            .post(format!("{}/auth.test", self.config.api_base))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(AdapterError::Http {
                status,
                detail: "auth.test request failed".to_string(),
            });
        }

        let parsed = response
            .json::<SlackAuthTestResponse>()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;

        if !parsed.ok {
            return Err(AdapterError::Rejected(
                parsed.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> SlackAdapter {
        SlackAdapter::new(SlackConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            oauth_base: "https://slack.com".to_string(),
            api_base: "https://slack.com/api".to_string(),
        })
    }

    #[test]
    fn authorize_url_carries_user_scopes_and_state() {
        let url = adapter()
            .authorize_url(&AuthorizeUrlParams {
                state: "state-456".to_string(),
                redirect_uri: "https://localhost:8080/callback".to_string(),
            })
            .expect("builds URL");

        assert!(url.as_str().starts_with("https://slack.com/oauth/v2/authorize"));

        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(query.contains(&("state".to_string(), "state-456".to_string())));

        let user_scope = query
            .iter()
            .find(|(k, _)| k == "user_scope")
            .map(|(_, v)| v.clone())
            .expect("user_scope present");
        for expected in DEFAULT_SLACK_SCOPES {
            assert!(user_scope.contains(expected));
        }
    }

    #[test]
    fn grant_from_requires_access_token() {
        let response = SlackOauthAccessResponse {
            ok: true,
            error: None,
            access_token: None,
            token_type: None,
            scope: None,
            expires_in: None,
            refresh_token: None,
            authed_user: None,
            team: None,
        };

        assert!(matches!(
            SlackAdapter::grant_from(&response),
            Err(AdapterError::MalformedResponse(_))
        ));
    }
}
