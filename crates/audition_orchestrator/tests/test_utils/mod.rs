//! Test utilities for orchestrator tests.

#![allow(dead_code)]

pub mod mock_batch;

pub use mock_batch::{MockBatchClient, SubmitGate, succeeded};

use audition_core::{Condition, ConditionSpecBuilder, NewPrompt, Prompt, ProviderKind};
use audition_database::InMemoryRunStore;
use audition_interface::RunStore;
use audition_orchestrator::{Orchestrator, Poller, Reconciler};
use audition_providers::ProviderRegistry;
use audition_rate_limit::{AuditionConfig, DefaultLimits, RateTracker};
use std::sync::Arc;

/// Configuration with fast retries and roomy default limits.
pub fn test_config() -> AuditionConfig {
    let mut config = AuditionConfig::default();
    config.orchestrator.retry_backoff_ms = 1;
    config.orchestrator.max_submit_retries = 2;
    config.rate_limit.default = DefaultLimits {
        rpm: 1_000,
        tpm: 1_000_000,
    };
    config.reconciler.staleness_secs = 0;
    config
}

/// Registry holding only `mock`.
pub fn registry_with(mock: &MockBatchClient) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.insert(Arc::new(mock.clone()));
    registry
}

/// A condition for `provider` and `count` distinct prompts.
pub async fn seed(
    store: &InMemoryRunStore,
    provider: ProviderKind,
    count: usize,
) -> anyhow::Result<(Condition, Vec<Prompt>)> {
    let spec = ConditionSpecBuilder::default()
        .slug(format!("{}-baseline", provider))
        .provider(provider)
        .model("mock-model")
        .max_tokens(64u32)
        .build()?;
    let condition = store.upsert_condition(&spec).await?;
    let mut prompts = Vec::with_capacity(count);
    for index in 0..count {
        prompts.push(
            store
                .upsert_prompt(&NewPrompt::new(format!("Continue the story, part {}.", index)))
                .await?,
        );
    }
    Ok((condition, prompts))
}

/// Orchestrator over `store` and `mock` with a fresh tracker.
pub fn orchestrator(store: &Arc<InMemoryRunStore>, mock: &MockBatchClient) -> Orchestrator {
    Orchestrator::new(
        store.clone(),
        registry_with(mock),
        Arc::new(RateTracker::new()),
        test_config(),
    )
}

/// Poller over `store` and `mock`.
pub fn poller(store: &Arc<InMemoryRunStore>, mock: &MockBatchClient) -> Poller {
    Poller::new(store.clone(), registry_with(mock), 4)
}

/// Reconciler over `store` and `mock` that treats every pending attempt as stuck.
pub fn reconciler(store: &Arc<InMemoryRunStore>, mock: &MockBatchClient) -> Reconciler {
    Reconciler::new(store.clone(), registry_with(mock), test_config().reconciler)
}
