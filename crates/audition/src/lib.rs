//! Audition - batch model auditions
//!
//! Audition runs "condition × prompts × replicates" experiments through the
//! discounted batch APIs of Anthropic and OpenAI. Every attempt is written
//! ahead before submission, polled to completion by an idempotent cycle, and
//! repaired by a reconciler when a run ends up pointing at the wrong batch.
//!
//! # Features
//!
//! - **Rate tracking**: sliding 60-second request/token windows per provider and model
//! - **Batch clients**: one contract over both providers' batch APIs
//! - **Write-ahead orchestration**: no request leaves without a stored attempt
//! - **Poll cycle**: safe to re-run; transient failures wait for the next cycle
//! - **Reconciliation**: custom ids in provider results are the ground truth
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use audition::{
//!     AuditionConfig, InMemoryRunStore, Orchestrator, Poller, ProviderRegistry, RateTracker,
//!     RunOptions,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuditionConfig::load()?;
//!     let registry = ProviderRegistry::from_config(&config)?;
//!     let store = Arc::new(InMemoryRunStore::new());
//!
//!     let orchestrator = Orchestrator::new(
//!         store.clone(),
//!         registry.clone(),
//!         Arc::new(RateTracker::new()),
//!         config.clone(),
//!     );
//!     let summary = orchestrator
//!         .run_batch(&condition, &prompts, RunOptions::default())
//!         .await?;
//!
//!     let poller = Poller::new(store, registry, config.orchestrator.status_concurrency);
//!     poller.poll_cycle().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Cargo Features
//!
//! - `postgres` - PostgreSQL run store for the `audition` binary
//!
//! # Architecture
//!
//! - `audition_error` - Error types
//! - `audition_core` - Data model and the custom id codec
//! - `audition_interface` - `BatchClient` and `RunStore` traits
//! - `audition_rate_limit` - Configuration and the rate tracker
//! - `audition_providers` - Anthropic and OpenAI batch clients
//! - `audition_database` - In-memory and PostgreSQL run stores
//! - `audition_orchestrator` - Submission, polling, reconciliation
//!
//! This crate (`audition`) re-exports everything for convenience.

pub use audition_core::*;
pub use audition_database::*;
pub use audition_error::*;
pub use audition_interface::*;
pub use audition_orchestrator::*;
pub use audition_providers::*;
pub use audition_rate_limit::*;

pub mod inputs;
pub mod observability;
