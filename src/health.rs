//! # Connection Health Monitor
//!
//! Verifies that a connection is both unexpired and live against its
//! provider, independent of the main token path. Check results are written
//! back onto the connection's health fields best-effort: a persistence
//! failure never fails the check itself.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ConnectionError;
use crate::models::connection::{self, ConnectionStatus};
use crate::providers::registry::AdapterRegistry;
use crate::repositories::connection::ConnectionRepository;

/// Result of a single connection health check
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthReport {
    pub connection_id: Uuid,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Aggregate result of a health sweep over active connections
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct HealthSummary {
    pub checked: u64,
    pub healthy: u64,
    pub unhealthy: u64,
}

/// Tenant-scoped health statistics for the admin surface
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct HealthStats {
    pub total: u64,
    pub healthy: u64,
    pub unhealthy: u64,
    pub never_checked: u64,
    pub by_provider: BTreeMap<String, HealthSummary>,
}

/// Connection health monitor
pub struct HealthMonitor {
    config: Arc<AppConfig>,
    connection_repo: Arc<ConnectionRepository>,
    registry: Arc<AdapterRegistry>,
}

impl HealthMonitor {
    pub fn new(
        config: Arc<AppConfig>,
        connection_repo: Arc<ConnectionRepository>,
        registry: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            config,
            connection_repo,
            registry,
        }
    }

    /// Check a single connection. An expired or revoked connection reports
    /// unhealthy without touching the network; otherwise the decrypted
    /// access token is probed against the provider's identity surface.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn check_connection(
        &self,
        connection_id: &Uuid,
    ) -> Result<HealthReport, ConnectionError> {
        let connection = self
            .connection_repo
            .get_by_id(connection_id)
            .await?
            .ok_or(ConnectionError::ConnectionNotFound)?;

        let report = self.evaluate(&connection).await;

        // Best-effort persistence: the report stands even if the write fails.
        if let Err(err) = self
            .connection_repo
            .record_health(
                connection_id,
                report.healthy,
                report.error.clone(),
                report.checked_at,
            )
            .await
        {
            warn!(
                connection_id = %connection_id,
                error = %err,
                "Failed to persist health check result"
            );
        }

        if report.healthy {
            counter!("health_checks_healthy_total").increment(1);
        } else {
            counter!("health_checks_unhealthy_total").increment(1);
        }

        Ok(report)
    }

    async fn evaluate(&self, connection: &connection::Model) -> HealthReport {
        let checked_at = Utc::now();

        if connection.lifecycle_status() == ConnectionStatus::Revoked {
            return HealthReport {
                connection_id: connection.id,
                healthy: false,
                error: Some("Connection revoked".to_string()),
                checked_at,
            };
        }

        if connection.is_token_expired(checked_at) {
            debug!(connection_id = %connection.id, "Health check short-circuit: token expired");
            return HealthReport {
                connection_id: connection.id,
                healthy: false,
                error: Some("Token expired".to_string()),
                checked_at,
            };
        }

        let access_token = match self.connection_repo.decrypt_access_token(connection) {
            Ok(token) => token,
            Err(_) => {
                return HealthReport {
                    connection_id: connection.id,
                    healthy: false,
                    error: Some("Stored token could not be decrypted".to_string()),
                    checked_at,
                };
            }
        };

        let adapter = match self.registry.get(&connection.provider_slug) {
            Ok(adapter) => adapter,
            Err(_) => {
                return HealthReport {
                    connection_id: connection.id,
                    healthy: false,
                    error: Some(format!(
                        "provider '{}' is not configured",
                        connection.provider_slug
                    )),
                    checked_at,
                };
            }
        };

        match adapter.ping(&access_token).await {
            Ok(()) => HealthReport {
                connection_id: connection.id,
                healthy: true,
                error: None,
                checked_at,
            },
            Err(err) => HealthReport {
                connection_id: connection.id,
                healthy: false,
                error: Some(err.to_string()),
                checked_at,
            },
        }
    }

    /// Sweep all active connections with bounded concurrency, aggregating
    /// healthy/unhealthy counts. Individual failures never abort the sweep.
    #[instrument(skip_all)]
    pub async fn check_all(&self) -> Result<HealthSummary, ConnectionError> {
        let connections = self.connection_repo.find_all_active().await?;
        let semaphore = Arc::new(Semaphore::new(self.config.health.concurrency as usize));

        let mut handles = Vec::with_capacity(connections.len());
        for connection in connections {
            let semaphore = semaphore.clone();
            let monitor = self.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                monitor.check_connection(&connection.id).await
            }));
        }

        let mut summary = HealthSummary::default();
        for handle in handles {
            summary.checked += 1;
            match handle.await {
                Ok(Ok(report)) if report.healthy => summary.healthy += 1,
                Ok(Ok(_)) => summary.unhealthy += 1,
                Ok(Err(err)) => {
                    warn!(error = %err, "Health check failed");
                    summary.unhealthy += 1;
                }
                Err(join_err) => {
                    warn!(error = ?join_err, "Health check task panicked or was cancelled");
                    summary.unhealthy += 1;
                }
            }
        }

        info!(
            checked = summary.checked,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            "Health sweep completed"
        );

        Ok(summary)
    }

    /// Tenant-scoped statistics over the persisted health fields
    pub async fn stats(&self, tenant_id: &Uuid) -> Result<HealthStats, ConnectionError> {
        let connections = self
            .connection_repo
            .list_by_tenant(tenant_id, &Default::default())
            .await?;

        let mut stats = HealthStats {
            total: connections.len() as u64,
            ..Default::default()
        };

        for connection in &connections {
            let provider = stats
                .by_provider
                .entry(connection.provider_slug.clone())
                .or_default();
            provider.checked += 1;

            match connection.health_check_status.as_deref() {
                Some("healthy") => {
                    stats.healthy += 1;
                    provider.healthy += 1;
                }
                Some(_) => {
                    stats.unhealthy += 1;
                    provider.unhealthy += 1;
                }
                None => stats.never_checked += 1,
            }
        }

        Ok(stats)
    }
}

impl Clone for HealthMonitor {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            connection_repo: self.connection_repo.clone(),
            registry: self.registry.clone(),
        }
    }
}
