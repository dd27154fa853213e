//! Batch submission, polling, and reconciliation for Audition.
//!
//! Three cooperating services share one [`RunStore`](audition_interface::RunStore)
//! and one [`ProviderRegistry`](audition_providers::ProviderRegistry):
//!
//! - [`Orchestrator`]: writes attempts ahead, plans cache-friendly chunks,
//!   waits on the shared [`RateTracker`](audition_rate_limit::RateTracker),
//!   submits with bounded retries, and cancels runs.
//! - [`Poller`]: the idempotent poll cycle that resolves `batch_pending`
//!   attempts from provider status and results.
//! - [`Reconciler`]: repairs attempts stamped with another run's batch id.
//!
//! # Example
//!
//! ```rust,ignore
//! use audition_orchestrator::{Orchestrator, Poller, RunOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(store.clone(), registry.clone(), tracker, config);
//! let summary = orchestrator.run_batch(&condition, &prompts, RunOptions::default()).await?;
//!
//! let poller = Poller::new(store, registry, 8);
//! let report = poller.poll_cycle().await?;
//! println!("{} attempts completed", report.completed);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod metrics;
mod orchestrator;
mod plan;
mod poller;
mod reconciler;

pub use metrics::BatchMetrics;
pub use orchestrator::{CANCELLED_REASON, Orchestrator, RunCancellation, RunOptions, RunSummary};
pub use plan::{ChunkCaps, PlanItem, plan_chunks};
pub use poller::{PollReport, Poller, Refetch};
pub use reconciler::{Correction, Flag, ReconcileReport, Reconciler, Unanswered};
