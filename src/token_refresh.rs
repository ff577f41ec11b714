//! # Token Refresh Service
//!
//! Decides when a connection's tokens need refreshing, performs the refresh
//! grant, and keeps the vault and cache consistent. Serves the token read
//! path (`get_token`) and the batch sweep over expiring connections, and can
//! optionally run as a background loop.
//!
//! Refreshes are serialized per connection through a keyed async mutex, so
//! two concurrent callers hitting the same expired connection produce a
//! single outbound refresh call.

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Duration as TokioDuration, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ConnectionError;
use crate::models::connection::{self, ConnectionStatus};
use crate::providers::registry::AdapterRegistry;
use crate::repositories::connection::ConnectionRepository;
use crate::token_cache::{CachedToken, TokenCache};

/// Token refresh service
pub struct TokenRefreshService {
    config: Arc<AppConfig>,
    connection_repo: Arc<ConnectionRepository>,
    registry: Arc<AdapterRegistry>,
    cache: Arc<TokenCache>,
    /// Per-connection refresh locks for single-flight protection
    refresh_locks: Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

/// Result of a token refresh operation. Failures are data, not errors, so a
/// batch sweep is never aborted by one connection.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefreshOutcome {
    pub connection_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_expires_at: Option<DateTime<Utc>>,
}

impl RefreshOutcome {
    fn failure(connection_id: Uuid, error: String) -> Self {
        Self {
            connection_id,
            success: false,
            error: Some(error),
            new_expires_at: None,
        }
    }
}

/// A decrypted token ready to hand to a downstream caller
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

/// Classification of refresh errors, used for logging and metrics
#[derive(Debug, PartialEq)]
pub enum RefreshErrorClassification {
    /// Failures that will not resolve on retry (e.g. invalid_grant)
    Permanent,
    /// Temporary failures (network issues, 5xx)
    Transient,
    /// Rate limiting
    RateLimited,
}

#[derive(Debug, Default)]
struct SweepStats {
    attempted: u64,
    succeeded: u64,
    failed: u64,
}

impl TokenRefreshService {
    /// Create a new token refresh service instance
    pub fn new(
        config: Arc<AppConfig>,
        connection_repo: Arc<ConnectionRepository>,
        registry: Arc<AdapterRegistry>,
        cache: Arc<TokenCache>,
    ) -> Self {
        Self {
            config,
            connection_repo,
            registry,
            cache,
            refresh_locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Serve a valid plaintext access token for the (user, tenant, provider)
    /// tuple. An expired token is refreshed synchronously before returning;
    /// otherwise the cache answers, falling back to a vault decrypt.
    #[instrument(skip(self), fields(%user_id, %tenant_id, provider = %provider_slug))]
    pub async fn get_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        provider_slug: &str,
        provider_team_id: Option<&str>,
    ) -> Result<IssuedToken, ConnectionError> {
        let connection = self
            .connection_repo
            .find_active(&user_id, &tenant_id, provider_slug, provider_team_id)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound)?;

        if !connection.is_token_expired(Utc::now()) {
            if let Some(cached) = self.cache.get(&connection.id) {
                counter!("token_cache_hits_total").increment(1);
                debug!(connection_id = %connection.id, "Serving access token from cache");
                return Ok(IssuedToken {
                    access_token: cached.access_token,
                    token_type: cached.token_type,
                    expires_at: Some(cached.expires_at),
                    scopes: cached.scopes,
                });
            }
            counter!("token_cache_misses_total").increment(1);
            return self.serve_from_vault(&connection);
        }

        // Expired: refresh before serving. The keyed lock collapses
        // concurrent callers into one provider call.
        let connection_id = connection.id;
        let lock = self.lock_for(connection_id);
        let guard = lock.lock().await;

        let refresh_result = match self.connection_repo.get_by_id(&connection_id).await {
            Ok(Some(current)) if current.lifecycle_status() != ConnectionStatus::Active => {
                Err(ConnectionError::ConnectionNotFound)
            }
            Ok(Some(current)) if current.is_token_expired(Utc::now()) => {
                match self.refresh_locked(current).await {
                    Ok(outcome) if outcome.success => Ok(()),
                    Ok(outcome) => Err(ConnectionError::RefreshFailed(
                        outcome
                            .error
                            .unwrap_or_else(|| "refresh grant failed".to_string()),
                    )),
                    Err(err) => Err(err),
                }
            }
            Ok(Some(_)) => {
                // A racing caller already refreshed while we waited.
                debug!(connection_id = %connection_id, "Refresh already performed by concurrent caller");
                Ok(())
            }
            Ok(None) => Err(ConnectionError::ConnectionNotFound),
            Err(err) => Err(err),
        };

        drop(guard);
        self.release_lock(&connection_id, &lock);
        refresh_result?;

        let refreshed = self
            .connection_repo
            .get_by_id(&connection_id)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound)?;

        if let Some(cached) = self.cache.get(&connection_id) {
            return Ok(IssuedToken {
                access_token: cached.access_token,
                token_type: cached.token_type,
                expires_at: Some(cached.expires_at),
                scopes: cached.scopes,
            });
        }

        self.serve_from_vault(&refreshed)
    }

    /// Refresh a single connection's tokens, serialized per connection.
    ///
    /// Provider-side failures move the connection to error status and come
    /// back as `success: false`; only caller bugs and vault integrity
    /// failures surface as `Err`.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn refresh_connection(
        &self,
        connection_id: &Uuid,
    ) -> Result<RefreshOutcome, ConnectionError> {
        let lock = self.lock_for(*connection_id);
        let guard = lock.lock().await;

        let outcome = match self.connection_repo.get_by_id(connection_id).await {
            // Revocation is terminal; a manual refresh must not resurrect it.
            Ok(Some(connection))
                if connection.lifecycle_status() == ConnectionStatus::Revoked =>
            {
                Err(ConnectionError::ConnectionNotFound)
            }
            Ok(Some(connection)) => self.refresh_locked(connection).await,
            Ok(None) => Err(ConnectionError::ConnectionNotFound),
            Err(err) => Err(err),
        };

        drop(guard);
        self.release_lock(connection_id, &lock);
        outcome
    }

    /// Perform the actual refresh grant. Caller must hold the connection's
    /// refresh lock.
    async fn refresh_locked(
        &self,
        connection: connection::Model,
    ) -> Result<RefreshOutcome, ConnectionError> {
        let refresh_start = std::time::Instant::now();
        let connection_id = connection.id;

        let refresh_token = self
            .connection_repo
            .decrypt_refresh_token(&connection)?
            .ok_or(ConnectionError::NoRefreshToken)?;

        let adapter = self
            .registry
            .get(&connection.provider_slug)
            .map_err(|_| ConnectionError::NotConfigured {
                provider: connection.provider_slug.clone(),
            })?;

        counter!("token_refresh_attempts_total").increment(1);

        match adapter.refresh_grant(&refresh_token).await {
            Ok(grant) => {
                let now = Utc::now();
                let new_expires_at = grant.expires_in.map(|secs| now + Duration::seconds(secs));

                let (access_cipher, refresh_cipher) = self.connection_repo.encrypt_tokens(
                    &connection.user_id,
                    &connection.tenant_id,
                    &connection.provider_slug,
                    &connection.provider_user_id,
                    &grant.access_token,
                    grant.refresh_token.as_deref(),
                )?;

                let scopes_json = if grant.scopes.is_empty() {
                    None
                } else {
                    Some(serde_json::json!(grant.scopes))
                };

                // Invalidate before the update lands so no reader can pair a
                // stale cached token with the new row.
                self.cache.invalidate(&connection_id);

                let updated = self
                    .connection_repo
                    .update_tokens(
                        &connection_id,
                        access_cipher,
                        refresh_cipher,
                        new_expires_at,
                        scopes_json,
                        ConnectionStatus::Active,
                        Some(now),
                    )
                    .await?;

                if let Some(expires_at) = updated.expires_at {
                    self.cache.set(
                        connection_id,
                        CachedToken {
                            access_token: grant.access_token,
                            token_type: updated.token_type.clone(),
                            expires_at: expires_at.with_timezone(&Utc),
                            scopes: updated.scope_list(),
                        },
                    );
                }

                let elapsed = refresh_start.elapsed();
                histogram!("token_refresh_latency_ms").record(elapsed.as_secs_f64() * 1_000.0);
                counter!(
                    "token_refresh_success_total",
                    &[("provider_slug", connection.provider_slug.clone())]
                )
                .increment(1);

                info!(
                    connection_id = %connection_id,
                    provider_slug = %connection.provider_slug,
                    refresh_duration_ms = elapsed.as_millis(),
                    rotated_refresh_token = grant.refresh_token.is_some(),
                    "Successfully refreshed connection tokens"
                );

                Ok(RefreshOutcome {
                    connection_id,
                    success: true,
                    error: None,
                    new_expires_at: updated.expires_at.map(|dt| dt.with_timezone(&Utc)),
                })
            }
            Err(err) => {
                let error_str = err.to_string();
                let classification = classify_refresh_error(&error_str);

                match classification {
                    RefreshErrorClassification::Permanent => {
                        error!(
                            connection_id = %connection_id,
                            provider_slug = %connection.provider_slug,
                            error = %error_str,
                            "Permanent token refresh failure"
                        );
                        counter!("token_refresh_permanent_failure_total").increment(1);
                    }
                    RefreshErrorClassification::Transient => {
                        warn!(
                            connection_id = %connection_id,
                            provider_slug = %connection.provider_slug,
                            error = %error_str,
                            "Transient token refresh failure"
                        );
                        counter!("token_refresh_transient_failure_total").increment(1);
                    }
                    RefreshErrorClassification::RateLimited => {
                        warn!(
                            connection_id = %connection_id,
                            provider_slug = %connection.provider_slug,
                            error = %error_str,
                            "Rate limited during token refresh"
                        );
                        counter!("token_refresh_rate_limited_total").increment(1);
                    }
                }

                self.cache.invalidate(&connection_id);
                self.connection_repo
                    .mark_status(&connection_id, ConnectionStatus::Error)
                    .await?;

                counter!(
                    "token_refresh_failure_total",
                    &[("provider_slug", connection.provider_slug.clone())]
                )
                .increment(1);

                Ok(RefreshOutcome::failure(connection_id, error_str))
            }
        }
    }

    /// Batch sweep over active connections whose tokens expire inside the
    /// lookahead window. Each connection refreshes independently under a
    /// per-connection timeout; one stuck provider cannot stall the sweep.
    #[instrument(skip_all)]
    pub async fn refresh_expiring(&self) -> Result<Vec<RefreshOutcome>, ConnectionError> {
        let now = Utc::now();
        let cutoff = now + Duration::seconds(self.config.token_refresh.lead_time_seconds as i64);
        let due = self.connection_repo.find_expiring(cutoff).await?;

        info!(
            found_connections = due.len(),
            lead_time_seconds = self.config.token_refresh.lead_time_seconds,
            "Found connections due for token refresh"
        );

        let semaphore = Arc::new(Semaphore::new(
            self.config.token_refresh.concurrency as usize,
        ));
        let per_connection_timeout =
            TokioDuration::from_secs(self.config.token_refresh.per_connection_timeout_seconds);

        let mut handles = Vec::new();
        for connection in due {
            let semaphore = semaphore.clone();
            let service = self.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let connection_id = connection.id;

                match timeout(
                    per_connection_timeout,
                    service.refresh_connection(&connection_id),
                )
                .await
                {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(err)) => RefreshOutcome::failure(connection_id, err.to_string()),
                    Err(_) => {
                        warn!(connection_id = %connection_id, "Refresh timed out");
                        RefreshOutcome::failure(connection_id, "refresh timed out".to_string())
                    }
                }
            }));
        }

        let mut stats = SweepStats::default();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => {
                    stats.attempted += 1;
                    if outcome.success {
                        stats.succeeded += 1;
                    } else {
                        stats.failed += 1;
                    }
                    results.push(outcome);
                }
                Err(join_err) => {
                    stats.attempted += 1;
                    stats.failed += 1;
                    error!(error = ?join_err, "Refresh task panicked or was cancelled");
                }
            }
        }

        debug!(
            attempted = stats.attempted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Token refresh sweep completed"
        );

        Ok(results)
    }

    /// Run the background sweep loop until the shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting token refresh service");
        let tick_interval = TokioDuration::from_secs(self.config.token_refresh.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.refresh_expiring().await {
                        error!(error = ?err, "Token refresh tick failed");
                    }
                    histogram!("token_refresh_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Token refresh service stopped");
    }

    fn serve_from_vault(
        &self,
        connection: &connection::Model,
    ) -> Result<IssuedToken, ConnectionError> {
        let access_token = self.connection_repo.decrypt_access_token(connection)?;
        let expires_at = connection.expires_at.map(|dt| dt.with_timezone(&Utc));
        let scopes = connection.scope_list();

        if let Some(expires_at) = expires_at {
            self.cache.set(
                connection.id,
                CachedToken {
                    access_token: access_token.clone(),
                    token_type: connection.token_type.clone(),
                    expires_at,
                    scopes: scopes.clone(),
                },
            );
        }

        Ok(IssuedToken {
            access_token,
            token_type: connection.token_type.clone(),
            expires_at,
            scopes,
        })
    }

    fn lock_for(&self, connection_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        locks
            .entry(connection_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the keyed lock once no other task holds a handle to it, keeping
    /// the lock map bounded by in-flight refreshes.
    fn release_lock(&self, connection_id: &Uuid, lock: &Arc<Mutex<()>>) {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        if Arc::strong_count(lock) <= 2 {
            locks.remove(connection_id);
        }
    }
}

impl Clone for TokenRefreshService {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            connection_repo: self.connection_repo.clone(),
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            refresh_locks: self.refresh_locks.clone(),
        }
    }
}

/// Classify a refresh error string for logging and metrics
pub fn classify_refresh_error(error_str: &str) -> RefreshErrorClassification {
    let error_lower = error_str.to_lowercase();

    if error_lower.contains("invalid_grant")
        || error_lower.contains("invalid_client")
        || error_lower.contains("unauthorized_client")
        || error_lower.contains("revoked")
        || error_lower.contains("access_denied")
        || error_lower.contains("unsupported_grant_type")
    {
        return RefreshErrorClassification::Permanent;
    }

    if error_lower.contains("rate_limit")
        || error_lower.contains("too_many_requests")
        || error_lower.contains("temporarily_unavailable")
        || error_lower.contains("quota_exceeded")
    {
        return RefreshErrorClassification::RateLimited;
    }

    RefreshErrorClassification::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_permanent_errors() {
        assert_eq!(
            classify_refresh_error("provider returned HTTP 400: invalid_grant"),
            RefreshErrorClassification::Permanent
        );
        assert_eq!(
            classify_refresh_error("token_revoked"),
            RefreshErrorClassification::Permanent
        );
    }

    #[test]
    fn classify_rate_limited_errors() {
        assert_eq!(
            classify_refresh_error("too_many_requests"),
            RefreshErrorClassification::RateLimited
        );
    }

    #[test]
    fn classify_defaults_to_transient() {
        assert_eq!(
            classify_refresh_error("connection reset by peer"),
            RefreshErrorClassification::Transient
        );
    }
}
