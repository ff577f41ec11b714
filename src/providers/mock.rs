//! Mock provider adapter
//!
//! Alternate implementation of [`ProviderAdapter`] selected at registry
//! build time when a provider's client credentials are absent. Returns
//! canned grants and identities so local development and tests can exercise
//! the full lifecycle without real provider credentials.

use async_trait::async_trait;
use url::Url;

use crate::providers::adapter::{
    AdapterError, AuthorizeUrlParams, ProviderAdapter, ProviderDescriptor, ProviderIdentity,
    TokenGrant,
};

const MOCK_TOKEN_LIFETIME_SECONDS: i64 = 3600;

/// Mock adapter standing in for a provider without configured credentials
pub struct MockAdapter {
    descriptor: ProviderDescriptor,
}

impl MockAdapter {
    pub fn new(slug: &str) -> Self {
        let descriptor = ProviderDescriptor {
            slug: slug.to_string(),
            display_name: format!("{} (mock)", slug),
            scopes: vec!["read".to_string(), "write".to_string()],
            authorization_endpoint: format!("https://{}.mock.relay.dev/oauth/authorize", slug),
            token_endpoint: format!("https://{}.mock.relay.dev/oauth/token", slug),
            mock: true,
        };

        Self { descriptor }
    }

    fn canned_grant(access_token: String) -> TokenGrant {
        TokenGrant {
            access_token,
            refresh_token: Some("mock-refresh-token".to_string()),
            token_type: "Bearer".to_string(),
            expires_in: Some(MOCK_TOKEN_LIFETIME_SECONDS),
            scopes: vec!["read".to_string(), "write".to_string()],
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn authorize_url(&self, params: &AuthorizeUrlParams) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&self.descriptor.authorization_endpoint)?;
        url.query_pairs_mut()
            .append_pair("client_id", "mock-client-id")
            .append_pair("redirect_uri", &params.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.descriptor.scopes.join(" "))
            .append_pair("state", &params.state);

        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<(TokenGrant, ProviderIdentity), AdapterError> {
        let grant = Self::canned_grant(format!("mock-access-{}", code));

        let identity = ProviderIdentity {
            provider_user_id: "mock-user".to_string(),
            provider_team_id: None,
            email: Some(format!("mock-user@{}.mock.relay.dev", self.descriptor.slug)),
            display_name: Some("Mock User".to_string()),
        };

        Ok((grant, identity))
    }

    async fn refresh_grant(&self, _refresh_token: &str) -> Result<TokenGrant, AdapterError> {
        // No rotation: refresh_token stays None so the stored one persists.
        let mut grant = Self::canned_grant("mock-access-refreshed".to_string());
        grant.refresh_token = None;
        Ok(grant)
    }

    async fn ping(&self, _access_token: &str) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_flow_round_trips_without_network() {
        let adapter = MockAdapter::new("google");

        let url = adapter
            .authorize_url(&AuthorizeUrlParams {
                state: "abc".to_string(),
                redirect_uri: "https://localhost:8080/callback".to_string(),
            })
            .expect("builds URL");
        assert_eq!(url.scheme(), "https");
        assert!(url.as_str().contains("state=abc"));

        let (grant, identity) = adapter
            .exchange_code("code-1", "https://localhost:8080/callback")
            .await
            .expect("exchanges");
        assert_eq!(grant.access_token, "mock-access-code-1");
        assert!(grant.refresh_token.is_some());
        assert_eq!(identity.provider_user_id, "mock-user");

        let refreshed = adapter.refresh_grant("mock-refresh-token").await.expect("refreshes");
        assert_eq!(refreshed.access_token, "mock-access-refreshed");
        assert!(refreshed.refresh_token.is_none());

        adapter.ping("anything").await.expect("pings");
    }
}
