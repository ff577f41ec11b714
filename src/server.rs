//! # Server Configuration
//!
//! Application state assembly and the Axum router for the Connections API.
//! The vault, cache, registry and services are built once here and injected
//! into handlers through [`AppState`].

use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::{CryptoKey, TokenVault};
use crate::db;
use crate::handlers;
use crate::health::HealthMonitor;
use crate::oauth::OAuthService;
use crate::providers::registry::AdapterRegistry;
use crate::repositories::authorization_state::AuthorizationStateRepository;
use crate::repositories::connection::ConnectionRepository;
use crate::telemetry;
use crate::token_cache::TokenCache;
use crate::token_refresh::TokenRefreshService;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub registry: Arc<AdapterRegistry>,
    pub cache: Arc<TokenCache>,
    pub connection_repo: Arc<ConnectionRepository>,
    pub state_repo: Arc<AuthorizationStateRepository>,
    pub oauth: Arc<OAuthService>,
    pub refresh: Arc<TokenRefreshService>,
    pub health: Arc<HealthMonitor>,
}

impl AppState {
    /// Assemble application state, building the adapter registry from the
    /// provider credentials in `config`.
    pub fn build(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let registry = AdapterRegistry::from_config(&config);
        Self::build_with_registry(config, db, registry)
    }

    /// Assemble application state around an explicit adapter registry.
    /// Tests use this to substitute stub adapters.
    pub fn build_with_registry(
        config: AppConfig,
        db: DatabaseConnection,
        registry: AdapterRegistry,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let key_bytes = config
            .crypto_key
            .clone()
            .ok_or_else(|| anyhow!("crypto key not configured"))?;
        let vault = TokenVault::new(
            CryptoKey::new(key_bytes).map_err(|err| anyhow!("invalid crypto key: {}", err))?,
        );

        let db_arc = Arc::new(db.clone());
        let registry = Arc::new(registry);
        let cache = Arc::new(TokenCache::new(
            config.token_cache.capacity,
            config.token_cache.max_ttl_seconds,
        ));

        let connection_repo = Arc::new(ConnectionRepository::new(db_arc.clone(), vault));
        let state_repo = Arc::new(AuthorizationStateRepository::new(db_arc));

        let oauth = Arc::new(OAuthService::new(
            config.clone(),
            registry.clone(),
            state_repo.clone(),
            connection_repo.clone(),
            cache.clone(),
        ));
        let refresh = Arc::new(TokenRefreshService::new(
            config.clone(),
            connection_repo.clone(),
            registry.clone(),
            cache.clone(),
        ));
        let health = Arc::new(HealthMonitor::new(
            config.clone(),
            connection_repo.clone(),
            registry.clone(),
        ));

        Ok(Self {
            config,
            db,
            registry,
            cache,
            connection_repo,
            state_repo,
            oauth,
            refresh,
            health,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/authorize", post(handlers::connect::start_authorization))
        .route("/token", get(handlers::tokens::get_token))
        .route("/refresh/expiring", post(handlers::tokens::refresh_expiring))
        .route(
            "/refresh/{connection_id}",
            post(handlers::tokens::refresh_connection),
        )
        .route(
            "/revoke/{connection_id}",
            post(handlers::tokens::revoke_connection),
        )
        .route("/admin/connections", get(handlers::admin::list_connections))
        .route(
            "/admin/connections/{connection_id}",
            get(handlers::admin::get_connection),
        )
        .route("/admin/stats", get(handlers::admin::stats))
        .route(
            "/admin/health/check/{connection_id}",
            post(handlers::admin::health_check_connection),
        )
        .route(
            "/admin/health/check-all",
            post(handlers::admin::health_check_all),
        )
        .route("/admin/health/stats", get(handlers::admin::health_stats))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        // Providers redirect the user's browser here without platform
        // credentials, so the callback stays outside the auth middleware.
        .route("/callback", get(handlers::connect::oauth_callback))
        .merge(protected)
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    Migrator::up(&db, None)
        .await
        .context("applying database migrations")?;

    let addr = config
        .bind_addr()
        .context("resolving server bind address")?;

    let state = AppState::build(config, db)?;

    let shutdown = CancellationToken::new();
    let mut background_refresh = None;
    if state.config.token_refresh.background_enabled {
        let service = state.refresh.clone();
        let token = shutdown.clone();
        background_refresh = Some(tokio::spawn(async move { service.run(token).await }));
    }

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = background_refresh {
        let _ = handle.await;
    }

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::connect::start_authorization,
        crate::handlers::connect::oauth_callback,
        crate::handlers::tokens::get_token,
        crate::handlers::tokens::refresh_connection,
        crate::handlers::tokens::refresh_expiring,
        crate::handlers::tokens::revoke_connection,
        crate::handlers::admin::list_connections,
        crate::handlers::admin::get_connection,
        crate::handlers::admin::stats,
        crate::handlers::admin::health_check_connection,
        crate::handlers::admin::health_check_all,
        crate::handlers::admin::health_stats,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::connect::AuthorizeRequest,
            crate::handlers::connect::AuthorizeResponse,
            crate::handlers::connect::CallbackResponse,
            crate::handlers::tokens::TokenResponse,
            crate::handlers::tokens::RevokeRequest,
            crate::handlers::tokens::RevokeResponse,
            crate::handlers::tokens::RefreshSweepResponse,
            crate::handlers::admin::ConnectionInfo,
            crate::handlers::admin::ConnectionsResponse,
            crate::handlers::admin::StatsResponse,
            crate::token_refresh::RefreshOutcome,
            crate::health::HealthReport,
            crate::health::HealthSummary,
            crate::health::HealthStats,
        )
    ),
    info(
        title = "Relay Connections API",
        description = "OAuth connection lifecycle management",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
