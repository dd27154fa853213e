//! Shared services for command handlers.

use audition::{
    AuditionConfig, AuditionResult, Orchestrator, Poller, ProviderRegistry, RateTracker,
    Reconciler, RunStore,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Configuration, store, and provider clients for one invocation.
pub struct Services {
    pub config: AuditionConfig,
    pub store: Arc<dyn RunStore>,
    pub registry: ProviderRegistry,
}

impl Services {
    /// Load configuration, open the store, and build provider clients.
    pub fn load(config_path: Option<&Path>) -> AuditionResult<Self> {
        let config = match config_path {
            Some(path) => AuditionConfig::from_file(path)?,
            None => AuditionConfig::load()?,
        };
        let registry = ProviderRegistry::from_config(&config)?;
        info!(providers = ?registry.providers(), "Provider clients ready");
        let store = open_store()?;
        Ok(Self {
            config,
            store,
            registry,
        })
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.store.clone(),
            self.registry.clone(),
            Arc::new(RateTracker::new()),
            self.config.clone(),
        )
    }

    pub fn poller(&self) -> Poller {
        Poller::new(
            self.store.clone(),
            self.registry.clone(),
            self.config.orchestrator.status_concurrency,
        )
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.registry.clone(),
            self.config.reconciler.clone(),
        )
    }
}

#[cfg(feature = "postgres")]
fn open_store() -> AuditionResult<Arc<dyn RunStore>> {
    let store = audition::PostgresRunStore::connect()?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
fn open_store() -> AuditionResult<Arc<dyn RunStore>> {
    Err(audition::ConfigError::new(
        "No persistent run store. Rebuild with --features postgres",
    )
    .into())
}
