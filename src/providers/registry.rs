//! Provider adapter registry
//!
//! In-memory registry mapping provider slugs to their adapter
//! implementations. Built once from configuration at startup and injected
//! wherever adapters are needed; a provider whose credentials are absent is
//! backed by the mock adapter instead of being branched around in business
//! logic.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::providers::adapter::{ProviderAdapter, ProviderDescriptor};
use crate::providers::google::{GOOGLE_PROVIDER_SLUG, GoogleAdapter, GoogleConfig};
use crate::providers::mock::MockAdapter;
use crate::providers::slack::{SLACK_PROVIDER_SLUG, SlackAdapter, SlackConfig};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{name}' is not configured")]
    ProviderNotConfigured { name: String },
}

/// Registry of configured provider adapters
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Build the registry from application configuration. Each known
    /// provider gets its real adapter when client credentials are present,
    /// or the mock adapter otherwise.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        match (
            config.google_client_id.clone(),
            config.google_client_secret.clone(),
        ) {
            (Some(client_id), Some(client_secret)) => {
                registry.register(Arc::new(GoogleAdapter::new(GoogleConfig {
                    client_id,
                    client_secret,
                    oauth_base: config.google_oauth_base.clone(),
                    api_base: config.google_api_base.clone(),
                })));
                info!(provider = GOOGLE_PROVIDER_SLUG, "Registered provider adapter");
            }
            _ => {
                warn!(
                    provider = GOOGLE_PROVIDER_SLUG,
                    "Client credentials absent, registering mock adapter"
                );
                registry.register(Arc::new(MockAdapter::new(GOOGLE_PROVIDER_SLUG)));
            }
        }

        match (
            config.slack_client_id.clone(),
            config.slack_client_secret.clone(),
        ) {
            (Some(client_id), Some(client_secret)) => {
                registry.register(Arc::new(SlackAdapter::new(SlackConfig {
                    client_id,
                    client_secret,
                    oauth_base: config.slack_oauth_base.clone(),
                    api_base: config.slack_api_base.clone(),
                })));
                info!(provider = SLACK_PROVIDER_SLUG, "Registered provider adapter");
            }
            _ => {
                warn!(
                    provider = SLACK_PROVIDER_SLUG,
                    "Client credentials absent, registering mock adapter"
                );
                registry.register(Arc::new(MockAdapter::new(SLACK_PROVIDER_SLUG)));
            }
        }

        registry
    }

    /// Register an adapter under the slug its descriptor declares
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let slug = adapter.descriptor().slug.clone();
        self.adapters.insert(slug, adapter);
    }

    /// Get an adapter by provider slug
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotConfigured {
                name: name.to_string(),
            })
    }

    /// Descriptors for all registered providers, sorted by slug for stable
    /// ordering
    pub fn list_descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<_> = self
            .adapters
            .values()
            .map(|adapter| adapter.descriptor().clone())
            .collect();
        descriptors.sort_by(|a, b| a.slug.cmp(&b.slug));
        descriptors
    }
}
