//! The poll cycle: resolving `batch_pending` attempts from provider state.

use crate::BatchMetrics;
use audition_core::{
    AttemptCompletion, AttemptStatus, BatchJob, BatchStatus, GenerationAttempt, ProviderKind,
    ResultOutcome, RunId,
};
use audition_error::AuditionResult;
use audition_interface::{BatchClient, RunStore};
use audition_providers::ProviderRegistry;
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A result that must be fetched again before it can be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refetch {
    /// Batch holding the result
    pub batch_id: String,
    /// Offending request
    pub custom_id: String,
    /// What was wrong with it
    pub reason: String,
}

/// What one poll cycle observed and changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Distinct batches queried
    pub batches_checked: usize,
    /// Batches still pending or in progress
    pub batches_in_flight: usize,
    /// Attempts moved to `completed`
    pub completed: usize,
    /// Attempts moved to `error`
    pub errored: usize,
    /// Status or result queries that failed; retried next cycle
    pub transient_errors: usize,
    /// Batches owned by a provider with no configured client
    pub unconfigured: usize,
    /// Completed batches that returned no results at all
    pub empty_batches: Vec<String>,
    /// Untrusted results, left `batch_pending`
    pub refetch: Vec<Refetch>,
    /// Result custom ids with no local attempt under that batch
    pub unmatched: Vec<String>,
    /// Local attempts a completed batch returned nothing for
    pub missing: usize,
    /// Runs whose attempts all became terminal this cycle
    pub finished_runs: Vec<RunId>,
}

impl PollReport {
    fn absorb(&mut self, batch: BatchPoll) {
        self.batches_checked += 1;
        self.completed += batch.completed;
        self.errored += batch.errored;
        self.missing += batch.missing;
        self.refetch.extend(batch.refetch);
        self.unmatched.extend(batch.unmatched);
        match batch.state {
            BatchState::InFlight => self.batches_in_flight += 1,
            BatchState::Transient => self.transient_errors += 1,
            BatchState::Unconfigured => self.unconfigured += 1,
            BatchState::Empty(batch_id) => self.empty_batches.push(batch_id),
            BatchState::Resolved => {}
        }
    }
}

#[derive(Debug)]
enum BatchState {
    Resolved,
    InFlight,
    Transient,
    Unconfigured,
    Empty(String),
}

#[derive(Debug)]
struct BatchPoll {
    state: BatchState,
    completed: usize,
    errored: usize,
    missing: usize,
    refetch: Vec<Refetch>,
    unmatched: Vec<String>,
}

impl BatchPoll {
    fn new(state: BatchState) -> Self {
        Self {
            state,
            completed: 0,
            errored: 0,
            missing: 0,
            refetch: Vec::new(),
            unmatched: Vec::new(),
        }
    }
}

/// Idempotent poll cycle over every `batch_pending` attempt.
///
/// Attempts are grouped by batch id and each batch is queried once, with at
/// most `concurrency` queries in flight. Completed batches have their
/// results written to the matching attempts; failed, cancelled and expired
/// batches fail their whole group. Status errors are never terminal: the
/// batch is skipped and tried again next cycle.
///
/// Safe to run alongside submissions and to re-run after a crash; attempts
/// that already reached a terminal state are never touched.
#[derive(Clone)]
pub struct Poller {
    store: Arc<dyn RunStore>,
    registry: ProviderRegistry,
    concurrency: usize,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("providers", &self.registry.providers())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Create a poller issuing at most `concurrency` status queries at once.
    pub fn new(store: Arc<dyn RunStore>, registry: ProviderRegistry, concurrency: usize) -> Self {
        Self {
            store,
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one cycle.
    ///
    /// # Errors
    ///
    /// Only store failures abort the cycle; provider failures are counted
    /// in the report.
    #[instrument(skip(self))]
    pub async fn poll_cycle(&self) -> AuditionResult<PollReport> {
        let pending = self
            .store
            .list_attempts_by_status(AttemptStatus::BatchPending)
            .await?;

        let mut groups: BTreeMap<String, (ProviderKind, Vec<GenerationAttempt>)> = BTreeMap::new();
        for attempt in pending {
            match attempt.batch_id.clone() {
                Some(batch_id) => groups
                    .entry(batch_id)
                    .or_insert_with(|| (attempt.provider, Vec::new()))
                    .1
                    .push(attempt),
                None => warn!(attempt_id = attempt.id, "batch_pending attempt has no batch id"),
            }
        }

        let touched: BTreeSet<RunId> = groups
            .values()
            .flat_map(|(_, attempts)| attempts)
            .map(|attempt| attempt.run_id.clone())
            .collect();

        let polls: Vec<BatchPoll> = stream::iter(groups)
            .map(|(batch_id, (provider, attempts))| async move {
                self.poll_batch(&batch_id, provider, attempts).await
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut report = PollReport::default();
        for poll in polls {
            report.absorb(poll);
        }
        report.finished_runs = finish_runs(self.store.as_ref(), touched).await?;

        info!(
            batches = report.batches_checked,
            completed = report.completed,
            errored = report.errored,
            in_flight = report.batches_in_flight,
            transient = report.transient_errors,
            "Poll cycle finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, provider, attempts), fields(provider = %provider, attempts = attempts.len()))]
    async fn poll_batch(
        &self,
        batch_id: &str,
        provider: ProviderKind,
        attempts: Vec<GenerationAttempt>,
    ) -> AuditionResult<BatchPoll> {
        let Some(client) = self.registry.get(provider) else {
            warn!(batch_id, provider = %provider, "No client configured; skipping batch");
            return Ok(BatchPoll::new(BatchState::Unconfigured));
        };
        let metrics = BatchMetrics::get();

        let job = match client.get_status(batch_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(batch_id, error = %e, "Status query failed; will retry next cycle");
                metrics.record_poll_error(provider);
                return Ok(BatchPoll::new(BatchState::Transient));
            }
        };

        match job.status {
            BatchStatus::Pending | BatchStatus::InProgress => {
                debug!(
                    batch_id,
                    status = %job.status,
                    processing = job.request_counts.processing,
                    "Batch still in flight"
                );
                Ok(BatchPoll::new(BatchState::InFlight))
            }
            BatchStatus::Failed | BatchStatus::Cancelled | BatchStatus::Expired => {
                let reason = format!("batch {} {}", batch_id, job.status);
                let ids: Vec<i64> = attempts.iter().map(|attempt| attempt.id).collect();
                let errored = self.store.fail_attempts(&ids, &reason).await?;
                metrics.record_resolved(provider, "error", errored);
                warn!(batch_id, status = %job.status, errored, "Batch ended without results");
                let mut poll = BatchPoll::new(BatchState::Resolved);
                poll.errored = errored;
                Ok(poll)
            }
            BatchStatus::Completed => self.apply_results(client.as_ref(), &job, attempts).await,
        }
    }

    async fn apply_results(
        &self,
        client: &dyn BatchClient,
        job: &BatchJob,
        attempts: Vec<GenerationAttempt>,
    ) -> AuditionResult<BatchPoll> {
        let batch_id = job.batch_id.as_str();
        let metrics = BatchMetrics::get();

        let results = match client.retrieve_results(job).await {
            Ok(results) => results,
            Err(e) => {
                warn!(batch_id, error = %e, "Result retrieval failed; will retry next cycle");
                metrics.record_poll_error(job.provider);
                return Ok(BatchPoll::new(BatchState::Transient));
            }
        };
        if results.is_empty() {
            warn!(
                batch_id,
                total = job.request_counts.total,
                "Batch completed with zero results"
            );
            return Ok(BatchPoll::new(BatchState::Empty(batch_id.to_string())));
        }

        let mut by_custom_id: HashMap<&str, &GenerationAttempt> = attempts
            .iter()
            .map(|attempt| (attempt.custom_id.as_str(), attempt))
            .collect();
        let mut poll = BatchPoll::new(BatchState::Resolved);

        for result in &results {
            let Some(attempt) = by_custom_id.remove(result.custom_id.as_str()) else {
                warn!(
                    batch_id,
                    custom_id = %result.custom_id,
                    "Result has no matching attempt under this batch"
                );
                poll.unmatched.push(result.custom_id.clone());
                continue;
            };
            match &result.outcome {
                ResultOutcome::Succeeded { text, usage } => {
                    let completion = AttemptCompletion {
                        response_text: text.clone(),
                        usage: *usage,
                    };
                    if self.store.complete_attempt(attempt.id, &completion).await? {
                        poll.completed += 1;
                    }
                }
                ResultOutcome::Errored { message } => {
                    poll.errored += self.store.fail_attempts(&[attempt.id], message).await?;
                }
                ResultOutcome::Invalid { reason } => {
                    warn!(
                        batch_id,
                        custom_id = %result.custom_id,
                        reason = %reason,
                        "Untrusted result left pending for re-fetch"
                    );
                    poll.refetch.push(Refetch {
                        batch_id: batch_id.to_string(),
                        custom_id: result.custom_id.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }

        poll.missing = by_custom_id.len();
        if poll.missing > 0 {
            warn!(
                batch_id,
                missing = poll.missing,
                "Completed batch has no result for some local attempts"
            );
        }
        metrics.record_resolved(job.provider, "completed", poll.completed);
        metrics.record_resolved(job.provider, "error", poll.errored);
        Ok(poll)
    }
}

/// Stamp completion on runs whose attempts are all terminal.
pub(crate) async fn finish_runs(
    store: &dyn RunStore,
    runs: BTreeSet<RunId>,
) -> AuditionResult<Vec<RunId>> {
    let mut finished = Vec::new();
    for run_id in runs {
        let run = store.get_run(&run_id).await?;
        if run.completed_at.is_some() {
            continue;
        }
        let attempts = store.list_attempts_for_run(&run_id).await?;
        if attempts.is_empty() || !attempts.iter().all(|a| a.status.is_terminal()) {
            continue;
        }
        let failures = attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Error)
            .count();
        let error = (failures == attempts.len())
            .then(|| format!("all {} attempts failed", failures));
        store.mark_run_completed(&run_id, error.as_deref()).await?;
        info!(run_id = %run_id, failures, "Run finished");
        finished.push(run_id);
    }
    Ok(finished)
}
