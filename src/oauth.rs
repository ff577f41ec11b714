//! # OAuth Orchestrator
//!
//! Drives the authorize → callback flow: issues CSRF state, exchanges
//! authorization codes through the provider adapter, normalizes identity,
//! encrypts token material into the connection record, and primes the token
//! cache. Also owns explicit revocation of connection records.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::Set;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ConnectionError;
use crate::models::connection::{self, ConnectionStatus};
use crate::providers::adapter::AuthorizeUrlParams;
use crate::providers::registry::AdapterRegistry;
use crate::repositories::authorization_state::{AuthorizationStateRepository, ConsumeOutcome};
use crate::repositories::connection::ConnectionRepository;
use crate::token_cache::{CachedToken, TokenCache};

/// Result of starting an authorization flow
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    pub authorization_url: Url,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a completed callback
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub connection_id: Uuid,
    pub provider: String,
    pub email: String,
}

/// OAuth flow orchestrator
pub struct OAuthService {
    config: Arc<AppConfig>,
    registry: Arc<AdapterRegistry>,
    state_repo: Arc<AuthorizationStateRepository>,
    connection_repo: Arc<ConnectionRepository>,
    cache: Arc<TokenCache>,
}

impl OAuthService {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<AdapterRegistry>,
        state_repo: Arc<AuthorizationStateRepository>,
        connection_repo: Arc<ConnectionRepository>,
        cache: Arc<TokenCache>,
    ) -> Self {
        Self {
            config,
            registry,
            state_repo,
            connection_repo,
            cache,
        }
    }

    /// Begin an authorization flow: mint a unique state, persist it with its
    /// TTL, and build the provider's authorization URL.
    #[instrument(skip(self), fields(%user_id, %tenant_id, provider = %provider_slug))]
    pub async fn start_authorization(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        provider_slug: &str,
        redirect_uri: Option<String>,
    ) -> Result<AuthorizationStart, ConnectionError> {
        let adapter =
            self.registry
                .get(provider_slug)
                .map_err(|_| ConnectionError::NotConfigured {
                    provider: provider_slug.to_string(),
                })?;

        let state_token = generate_secure_state();
        let effective_redirect = redirect_uri
            .clone()
            .unwrap_or_else(|| self.config.default_redirect_uri());

        // Build the URL before persisting the state so a connector bug
        // leaves no orphaned state row behind.
        let authorization_url = adapter
            .authorize_url(&AuthorizeUrlParams {
                state: state_token.clone(),
                redirect_uri: effective_redirect,
            })
            .map_err(|err| {
                warn!(provider = %provider_slug, error = %err, "Failed to build authorization URL");
                ConnectionError::NotConfigured {
                    provider: provider_slug.to_string(),
                }
            })?;

        let persisted = self
            .state_repo
            .create(
                user_id,
                tenant_id,
                provider_slug,
                &state_token,
                redirect_uri,
                self.config.state_ttl_minutes,
            )
            .await?;

        counter!("oauth_authorize_started_total").increment(1);
        info!(
            state_id = %persisted.id,
            provider = %provider_slug,
            "OAuth flow initiated"
        );

        Ok(AuthorizationStart {
            authorization_url,
            state: state_token,
            expires_at: persisted.expires_at,
        })
    }

    /// Complete a callback: consume the state, exchange the code, normalize
    /// identity, encrypt tokens, upsert the connection and prime the cache.
    #[instrument(skip_all, fields(state = %redact_state(state)))]
    pub async fn handle_callback(
        &self,
        code: &str,
        state: &str,
    ) -> Result<CallbackOutcome, ConnectionError> {
        // Unknown, expired and replayed states fail identically to callers;
        // the logs keep the distinction.
        let state_model = match self.state_repo.consume(state).await? {
            ConsumeOutcome::Consumed(model) => model,
            ConsumeOutcome::Unknown => {
                warn!("Callback presented an unknown state token");
                counter!("oauth_callback_invalid_state_total").increment(1);
                return Err(ConnectionError::InvalidOrExpiredState);
            }
            ConsumeOutcome::Expired => {
                warn!("Callback presented an expired state token");
                counter!("oauth_callback_invalid_state_total").increment(1);
                return Err(ConnectionError::InvalidOrExpiredState);
            }
            ConsumeOutcome::Replayed => {
                warn!("Callback lost the consumption race for a state token");
                counter!("oauth_callback_invalid_state_total").increment(1);
                return Err(ConnectionError::InvalidOrExpiredState);
            }
        };

        let adapter = self.registry.get(&state_model.provider_slug).map_err(|_| {
            ConnectionError::NotConfigured {
                provider: state_model.provider_slug.clone(),
            }
        })?;

        let redirect_uri = state_model
            .redirect_uri
            .clone()
            .unwrap_or_else(|| self.config.default_redirect_uri());

        let (grant, identity) = adapter
            .exchange_code(code, &redirect_uri)
            .await
            .map_err(|err| {
                counter!("oauth_callback_exchange_failed_total").increment(1);
                ConnectionError::TokenExchange(err.to_string())
            })?;

        let now = Utc::now();
        let expires_at = grant.expires_in.map(|secs| now + Duration::seconds(secs));
        let scopes_json = if grant.scopes.is_empty() {
            None
        } else {
            Some(serde_json::json!(grant.scopes))
        };
        let email = identity.email.clone().unwrap_or_default();

        let (access_cipher, refresh_cipher) = self.connection_repo.encrypt_tokens(
            &state_model.user_id,
            &state_model.tenant_id,
            &state_model.provider_slug,
            &identity.provider_user_id,
            &grant.access_token,
            grant.refresh_token.as_deref(),
        )?;

        // Upsert keyed by (user, tenant, provider, provider user); a repeat
        // authorization updates the stored credential set in place.
        let existing = self
            .connection_repo
            .find_by_identity(
                &state_model.user_id,
                &state_model.tenant_id,
                &state_model.provider_slug,
                &identity.provider_user_id,
            )
            .await?;

        let connection = match existing {
            Some(current) => {
                info!(connection_id = %current.id, "Updating existing connection from callback");
                self.connection_repo
                    .update_from_callback(
                        &current.id,
                        &email,
                        identity.provider_team_id.clone(),
                        &grant.token_type,
                        access_cipher,
                        refresh_cipher,
                        expires_at,
                        scopes_json,
                    )
                    .await?
            }
            None => {
                let model = connection::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(state_model.user_id),
                    tenant_id: Set(state_model.tenant_id),
                    provider_slug: Set(state_model.provider_slug.clone()),
                    provider_user_id: Set(identity.provider_user_id.clone()),
                    provider_team_id: Set(identity.provider_team_id.clone()),
                    email: Set(email.clone()),
                    status: Set(ConnectionStatus::Active.as_str().to_string()),
                    access_token_ciphertext: Set(Some(access_cipher)),
                    refresh_token_ciphertext: Set(refresh_cipher),
                    token_type: Set(grant.token_type.clone()),
                    expires_at: Set(expires_at.map(Into::into)),
                    scopes: Set(scopes_json),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                    last_refreshed_at: Set(None),
                    revoked_at: Set(None),
                    revoked_by: Set(None),
                    revoke_reason: Set(None),
                    last_health_check_at: Set(None),
                    health_check_status: Set(None),
                    health_check_error: Set(None),
                };
                self.connection_repo.create(model).await?
            }
        };

        // Prime the cache so the first token read avoids a vault decrypt.
        self.cache.invalidate(&connection.id);
        if let Some(expires_at) = expires_at {
            self.cache.set(
                connection.id,
                CachedToken {
                    access_token: grant.access_token,
                    token_type: connection.token_type.clone(),
                    expires_at,
                    scopes: connection.scope_list(),
                },
            );
        }

        counter!("oauth_callback_success_total").increment(1);
        info!(
            connection_id = %connection.id,
            provider = %connection.provider_slug,
            "OAuth callback completed"
        );

        Ok(CallbackOutcome {
            connection_id: connection.id,
            provider: connection.provider_slug,
            email: connection.email,
        })
    }

    /// Revoke a connection record. The row is retained for audit; only the
    /// status flips and the cache entry is dropped. Provider-side token
    /// revocation is intentionally not performed here.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn revoke_connection(
        &self,
        connection_id: &Uuid,
        revoked_by: &str,
        reason: Option<String>,
    ) -> Result<connection::Model, ConnectionError> {
        let revoked = self
            .connection_repo
            .revoke(connection_id, revoked_by, reason)
            .await?;
        self.cache.invalidate(connection_id);

        counter!("connections_revoked_total").increment(1);
        info!(connection_id = %connection_id, revoked_by = %revoked_by, "Connection revoked");

        Ok(revoked)
    }
}

/// Generate a cryptographically secure random state token (256 bits,
/// base64url)
pub fn generate_secure_state() -> String {
    use rand::Rng;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);

    base64_url::encode(&bytes)
}

/// Shorten a state token for span fields so the full value never lands in
/// logs.
fn redact_state(state: &str) -> String {
    let prefix: String = state.chars().take(6).collect();
    format!("{}…", prefix)
}
