//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use connections::config::AppConfig;
use connections::models::connection::{self, ConnectionStatus};
use connections::providers::{
    AdapterRegistry, GoogleAdapter, GoogleConfig, SlackAdapter, SlackConfig,
};
use connections::server::AppState;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, Set};
use tempfile::TempDir;
use uuid::Uuid;

/// Application state plus the tempdir keeping the sqlite file alive.
pub struct TestContext {
    pub state: AppState,
    _db_dir: TempDir,
}

/// Minimal valid configuration for tests.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec!["test-operator-token".to_string()],
        crypto_key: Some(vec![7u8; 32]),
        ..Default::default()
    }
}

/// Registry with a Google adapter whose token/userinfo calls hit `api_base`
/// (normally a wiremock server). The authorization endpoint stays on the
/// real host so URL validation keeps seeing HTTPS.
pub fn google_registry(api_base: &str) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(GoogleAdapter::new(GoogleConfig {
        client_id: "test-client-id".to_string(),
        client_secret: "test-client-secret".to_string(),
        oauth_base: "https://accounts.google.com".to_string(),
        api_base: api_base.to_string(),
    })));
    registry
}

/// Registry with a Slack adapter pointed at a wiremock server.
pub fn slack_registry(api_base: &str) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(SlackAdapter::new(SlackConfig {
        client_id: "test-client-id".to_string(),
        client_secret: "test-client-secret".to_string(),
        oauth_base: "https://slack.com".to_string(),
        api_base: api_base.to_string(),
    })));
    registry
}

/// Build application state over a fresh file-backed sqlite database with
/// migrations applied.
pub async fn setup_state(registry: AdapterRegistry) -> TestContext {
    setup_state_with_config(test_config(), registry).await
}

pub async fn setup_state_with_config(config: AppConfig, registry: AdapterRegistry) -> TestContext {
    let db_dir = tempfile::tempdir().expect("create temp dir");
    let db_path = db_dir.path().join("connections-test.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let db = Database::connect(db_url)
        .await
        .expect("connect to test database");
    Migrator::up(&db, None).await.expect("apply migrations");

    let state =
        AppState::build_with_registry(config, db, registry).expect("build application state");

    TestContext {
        state,
        _db_dir: db_dir,
    }
}

/// Insert a connection row directly, encrypting the provided plaintext
/// tokens through the state's vault.
#[allow(clippy::too_many_arguments)]
pub async fn insert_connection(
    state: &AppState,
    user_id: Uuid,
    tenant_id: Uuid,
    provider_slug: &str,
    provider_user_id: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> connection::Model {
    let (access_cipher, refresh_cipher) = state
        .connection_repo
        .encrypt_tokens(
            &user_id,
            &tenant_id,
            provider_slug,
            provider_user_id,
            access_token,
            refresh_token,
        )
        .expect("encrypt test tokens");

    let now = Utc::now();
    let model = connection::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        tenant_id: Set(tenant_id),
        provider_slug: Set(provider_slug.to_string()),
        provider_user_id: Set(provider_user_id.to_string()),
        provider_team_id: Set(None),
        email: Set(format!("{}@example.com", provider_user_id)),
        status: Set(ConnectionStatus::Active.as_str().to_string()),
        access_token_ciphertext: Set(Some(access_cipher)),
        refresh_token_ciphertext: Set(refresh_cipher),
        token_type: Set("Bearer".to_string()),
        expires_at: Set(expires_at.map(Into::into)),
        scopes: Set(Some(serde_json::json!(["email", "profile"]))),
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

    state
        .connection_repo
        .create(model)
        .await
        .expect("insert test connection")
}

/// Force a connection's expiry into the past, simulating clock advance.
pub async fn expire_connection(state: &AppState, connection_id: &Uuid) {
    use sea_orm::{ActiveModelTrait, EntityTrait};

    let existing = connection::Entity::find_by_id(*connection_id)
        .one(&state.db)
        .await
        .expect("query connection")
        .expect("connection exists");

    let mut model: connection::ActiveModel = existing.into();
    model.expires_at = Set(Some((Utc::now() - chrono::Duration::seconds(10)).into()));
    model.update(&state.db).await.expect("expire connection");
}
