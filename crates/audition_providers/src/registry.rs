//! Provider lookup for the layers above the batch clients.

use crate::{AnthropicBatchClient, OpenAiBatchClient, ProviderSettings};
use audition_core::ProviderKind;
use audition_error::{AuditionResult, ProviderError};
use audition_interface::BatchClient;
use audition_rate_limit::AuditionConfig;
use std::collections::HashMap;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{info, warn};

/// Batch clients keyed by provider.
///
/// Orchestration code asks the registry for a client and then talks only to
/// the [`BatchClient`] trait.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderKind, Arc<dyn BatchClient>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client for every configured provider with an API key present.
    ///
    /// Providers with no config section or no key are skipped with a
    /// warning so one missing key does not block the other provider.
    pub fn from_config(config: &AuditionConfig) -> AuditionResult<Self> {
        let mut registry = Self::new();
        for kind in ProviderKind::iter() {
            let Some(section) = config.provider(kind.as_ref()) else {
                warn!(provider = %kind, "No configuration section, skipping provider");
                continue;
            };
            let settings = match ProviderSettings::from_config(kind, section) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(provider = %kind, error = %e, "Provider unavailable");
                    continue;
                }
            };
            registry.insert(build_client(kind, settings)?);
        }
        info!(providers = ?registry.providers(), "Provider registry ready");
        Ok(registry)
    }

    /// Register a client under its own provider, replacing any previous one.
    pub fn insert(&mut self, client: Arc<dyn BatchClient>) {
        self.clients.insert(client.provider(), client);
    }

    /// Client for `kind`, if registered.
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn BatchClient>> {
        self.clients.get(&kind).cloned()
    }

    /// Registered providers in stable order.
    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.clients.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

/// The one place a provider kind turns into a concrete client.
pub fn build_client(
    kind: ProviderKind,
    settings: ProviderSettings,
) -> Result<Arc<dyn BatchClient>, ProviderError> {
    let client: Arc<dyn BatchClient> = match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicBatchClient::new(settings)?),
        ProviderKind::OpenAi => Arc::new(OpenAiBatchClient::new(settings)?),
    };
    Ok(client)
}
