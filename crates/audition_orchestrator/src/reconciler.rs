//! Repairing the run ↔ batch mapping from provider-side truth.
//!
//! Concurrent submissions can stamp a run's attempts with a batch id that
//! actually serves another run. The custom ids inside a completed batch's
//! results are the ground truth: they name the run each request belongs to.
//! This module rebuilds the mapping from those ids and repoints stuck
//! attempts. Any change to the custom id layout breaks this for historical
//! batches.

use crate::BatchMetrics;
use crate::poller::finish_runs;
use audition_core::{
    AttemptStatus, BatchStatus, CustomId, GenerationAttempt, ProviderKind, ResultOutcome, RunId,
};
use audition_error::AuditionResult;
use audition_interface::RunStore;
use audition_providers::ProviderRegistry;
use audition_rate_limit::ReconcilerConfig;
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Concurrent provider queries during a scan.
const SCAN_CONCURRENCY: usize = 4;

/// A run repointed to its true batch or batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// The repaired run
    pub run_id: RunId,
    /// Batch ids the stuck attempts were recorded under
    pub from: BTreeSet<String>,
    /// Batch ids that actually hold the run's results
    pub to: BTreeSet<String>,
    /// Attempts repointed
    pub attempts: usize,
    /// Attempts still `pending` that were stamped `batch_pending`
    pub recovered: usize,
}

/// An attempt failed because no readable batch returned its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unanswered {
    /// The failed attempt's request id
    pub custom_id: String,
    /// Reason written to the attempt
    pub reason: String,
}

/// A run that could not be repaired and was marked as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    /// The flagged run
    pub run_id: RunId,
    /// Reason written to the run
    pub reason: String,
}

/// What one reconciliation pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Runs with attempts stuck in `pending` or `batch_pending`
    pub stuck_runs: usize,
    /// Batches queried
    pub batches_scanned: usize,
    /// Batches whose scan gave no usable answer (error, in flight, or empty)
    pub batches_unresolved: usize,
    /// Repaired runs
    pub corrections: Vec<Correction>,
    /// Runs marked as errors for operator review
    pub flagged: Vec<Flag>,
    /// Attempts failed because every batch was read and none answered them
    pub unanswered: Vec<Unanswered>,
    /// Stuck runs with attempts left alone because some batch could not be
    /// read yet
    pub deferred: Vec<RunId>,
    /// Runs whose attempts all became terminal this pass
    pub finished_runs: Vec<RunId>,
}

/// What scanning one batch revealed.
#[derive(Debug)]
enum Scan {
    /// Completed; custom id → run id of every resolvable result
    Served(HashMap<String, RunId>),
    /// Terminal without results; serves nobody
    Dead,
    /// No answer this time
    Unresolved,
}

/// Rebuilds run ↔ batch mapping for stuck work.
///
/// 1. Attempts `batch_pending` for longer than `staleness_secs` are stuck.
///    So are attempts still `pending` that long: a crash between submission
///    and stamping leaves them behind.
/// 2. Candidate batches are every batch submitted within `lookback_secs`
///    plus every batch a pending attempt points at.
/// 3. Each completed candidate's results are scanned, all of them, and each
///    custom id is resolved to the run it names.
/// 4. A stuck run whose attempts were found in other batches is repointed,
///    atomically per run, and its `pending` attempts are stamped with the
///    batch that holds them. A stuck run found nowhere is marked as an
///    error. A stuck attempt missing from every batch is failed. Neither
///    happens while some candidate could not be read; those are left for a
///    later pass.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RunStore>,
    registry: ProviderRegistry,
    config: ReconcilerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("providers", &self.registry.providers())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        store: Arc<dyn RunStore>,
        registry: ProviderRegistry,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Run one reconciliation pass.
    ///
    /// # Errors
    ///
    /// Store failures abort the pass. A failed correction leaves that run
    /// untouched.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> AuditionResult<ReconcileReport> {
        let now = Utc::now();
        let stale_before = cutoff(now, self.config.staleness_secs);
        let pending = self
            .store
            .list_attempts_by_status(AttemptStatus::BatchPending)
            .await?;
        let unsent = self
            .store
            .list_attempts_by_status(AttemptStatus::Pending)
            .await?;

        let mut stuck: BTreeMap<RunId, Vec<GenerationAttempt>> = BTreeMap::new();
        for attempt in pending
            .iter()
            .chain(&unsent)
            .filter(|a| a.updated_at <= stale_before)
        {
            stuck
                .entry(attempt.run_id.clone())
                .or_default()
                .push(attempt.clone());
        }
        let mut report = ReconcileReport {
            stuck_runs: stuck.len(),
            ..ReconcileReport::default()
        };
        if stuck.is_empty() {
            debug!("No stuck attempts");
            return Ok(report);
        }

        let submissions = self
            .store
            .list_batch_submissions_since(cutoff(now, self.config.lookback_secs))
            .await?;
        let mut candidates: BTreeMap<String, ProviderKind> = BTreeMap::new();
        let mut known_runs: BTreeSet<RunId> = BTreeSet::new();
        for submission in &submissions {
            candidates.insert(submission.batch_id.clone(), submission.provider);
            known_runs.insert(submission.run_id.clone());
        }
        for attempt in pending.iter().chain(&unsent) {
            if let Some(batch_id) = &attempt.batch_id {
                candidates.insert(batch_id.clone(), attempt.provider);
            }
            known_runs.insert(attempt.run_id.clone());
        }
        info!(
            stuck_runs = stuck.len(),
            candidates = candidates.len(),
            "Scanning candidate batches"
        );

        let known = &known_runs;
        let scans: Vec<(String, Scan)> = stream::iter(candidates)
            .map(|(batch_id, provider)| async move {
                let scan = self.scan_batch(&batch_id, provider, known).await;
                (batch_id, scan)
            })
            .buffer_unordered(SCAN_CONCURRENCY)
            .collect()
            .await;

        report.batches_scanned = scans.len();
        let mut batch_of: HashMap<String, String> = HashMap::new();
        let mut batches_of_run: BTreeMap<RunId, BTreeSet<String>> = BTreeMap::new();
        let mut served_batches: BTreeSet<String> = BTreeSet::new();
        for (batch_id, scan) in scans {
            match scan {
                Scan::Served(served) => {
                    let runs: BTreeSet<&RunId> = served.values().collect();
                    if runs.len() > 1 {
                        info!(batch_id = %batch_id, runs = runs.len(), "Batch serves several runs");
                    }
                    for (custom_id, run_id) in served {
                        batches_of_run
                            .entry(run_id)
                            .or_default()
                            .insert(batch_id.clone());
                        batch_of.insert(custom_id, batch_id.clone());
                    }
                    served_batches.insert(batch_id);
                }
                Scan::Dead => {}
                Scan::Unresolved => report.batches_unresolved += 1,
            }
        }

        let mut settled: BTreeSet<RunId> = BTreeSet::new();
        for (run_id, attempts) in stuck {
            let Some(true_batches) = batches_of_run.get(&run_id) else {
                if report.batches_unresolved > 0 {
                    debug!(run_id = %run_id, "No batch found yet; deferring");
                    report.deferred.push(run_id);
                } else {
                    let reason = format!(
                        "no provider batch serves run {}; its batch failed, expired, or was never accepted",
                        run_id
                    );
                    warn!(run_id = %run_id, "Flagging unrecoverable run");
                    self.store.mark_run_error(&run_id, &reason).await?;
                    BatchMetrics::get().record_flag();
                    report.flagged.push(Flag { run_id, reason });
                }
                continue;
            };

            let mut assignments: Vec<(i64, String)> = Vec::new();
            let mut stamps: BTreeMap<String, Vec<i64>> = BTreeMap::new();
            let mut unlocated: Vec<&GenerationAttempt> = Vec::new();
            for attempt in &attempts {
                match batch_of.get(&attempt.custom_id) {
                    None => unlocated.push(attempt),
                    Some(actual) if attempt.status == AttemptStatus::Pending => {
                        stamps.entry(actual.clone()).or_default().push(attempt.id);
                    }
                    Some(actual) if attempt.batch_id.as_deref() != Some(actual.as_str()) => {
                        assignments.push((attempt.id, actual.clone()));
                    }
                    Some(_) => {}
                }
            }

            let waiting: Vec<&GenerationAttempt> = attempts
                .iter()
                .filter(|a| a.status == AttemptStatus::BatchPending)
                .collect();
            let from: BTreeSet<String> = waiting
                .iter()
                .filter_map(|attempt| attempt.batch_id.clone())
                .collect();
            let run_pending = pending.iter().filter(|a| a.run_id == run_id).count();
            let whole_run = run_pending == waiting.len()
                && waiting.iter().all(|a| batch_of.contains_key(&a.custom_id));

            let mut repointed = 0;
            if !assignments.is_empty() {
                match self
                    .apply(&run_id, true_batches, whole_run, &assignments)
                    .await
                {
                    Ok(count) => repointed = count,
                    Err(e) => {
                        warn!(run_id = %run_id, error = %e, "Correction failed; run left unchanged");
                        continue;
                    }
                }
            }
            let mut recovered = 0;
            for (batch_id, ids) in &stamps {
                match self.store.mark_attempts_submitted(ids, batch_id).await {
                    Ok(()) => recovered += ids.len(),
                    Err(e) => {
                        warn!(run_id = %run_id, batch_id = %batch_id, error = %e, "Could not stamp unsent attempts");
                    }
                }
            }
            if repointed + recovered > 0 {
                info!(
                    run_id = %run_id,
                    from = ?from,
                    to = ?true_batches,
                    attempts = repointed,
                    recovered,
                    "Repointed run to its true batch"
                );
                BatchMetrics::get().record_correction();
                report.corrections.push(Correction {
                    run_id: run_id.clone(),
                    from,
                    to: true_batches.clone(),
                    attempts: repointed,
                    recovered,
                });
            } else if unlocated.is_empty() {
                debug!(run_id = %run_id, "Mapping already consistent");
            }

            if unlocated.is_empty() {
                continue;
            }
            if report.batches_unresolved > 0 {
                debug!(run_id = %run_id, unlocated = unlocated.len(), "Some attempts not found yet; deferring");
                report.deferred.push(run_id);
                continue;
            }
            for attempt in unlocated {
                let reason = match attempt.batch_id.as_deref() {
                    Some(batch_id) if served_batches.contains(batch_id) => format!(
                        "no result for {} in completed batch {}",
                        attempt.custom_id, batch_id
                    ),
                    _ => format!(
                        "no result for {} in any batch of run {}",
                        attempt.custom_id, run_id
                    ),
                };
                warn!(run_id = %run_id, custom_id = %attempt.custom_id, "Failing unanswered attempt");
                if self.store.fail_attempts(&[attempt.id], &reason).await? > 0 {
                    report.unanswered.push(Unanswered {
                        custom_id: attempt.custom_id.clone(),
                        reason,
                    });
                }
            }
            settled.insert(run_id);
        }

        report.finished_runs = finish_runs(self.store.as_ref(), settled).await?;
        Ok(report)
    }

    /// A run served by one batch, with every pending attempt located, is
    /// repointed as a whole; anything else is corrected attempt by attempt.
    async fn apply(
        &self,
        run_id: &RunId,
        true_batches: &BTreeSet<String>,
        whole_run: bool,
        assignments: &[(i64, String)],
    ) -> AuditionResult<usize> {
        match true_batches.iter().next() {
            Some(batch_id) if true_batches.len() == 1 && whole_run => {
                self.store.update_attempts_batch_id(run_id, batch_id).await
            }
            _ => self.store.reassign_attempts(run_id, assignments).await,
        }
    }

    async fn scan_batch(
        &self,
        batch_id: &str,
        provider: ProviderKind,
        known_runs: &BTreeSet<RunId>,
    ) -> Scan {
        let Some(client) = self.registry.get(provider) else {
            warn!(batch_id, provider = %provider, "No client configured; cannot scan batch");
            return Scan::Unresolved;
        };
        let job = match client.get_status(batch_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(batch_id, error = %e, "Status query failed during reconciliation");
                return Scan::Unresolved;
            }
        };
        match job.status {
            BatchStatus::Pending | BatchStatus::InProgress => return Scan::Unresolved,
            BatchStatus::Failed | BatchStatus::Cancelled | BatchStatus::Expired => {
                return Scan::Dead;
            }
            BatchStatus::Completed => {}
        }

        let results = match client.retrieve_results(&job).await {
            Ok(results) => results,
            Err(e) => {
                warn!(batch_id, error = %e, "Result retrieval failed during reconciliation");
                return Scan::Unresolved;
            }
        };
        if results.is_empty() {
            warn!(batch_id, "Completed batch has zero results");
            return Scan::Unresolved;
        }

        let mut served = HashMap::new();
        let mut unknown = 0;
        for result in results {
            if let ResultOutcome::Invalid { reason } = &result.outcome {
                debug!(batch_id, custom_id = %result.custom_id, reason = %reason, "Scanning untrusted result by id only");
            }
            match CustomId::resolve(&result.custom_id, |run| known_runs.contains(run)) {
                Some(id) => {
                    served.insert(result.custom_id, id.run_id);
                }
                None => unknown += 1,
            }
        }
        if unknown > 0 {
            warn!(batch_id, unknown, "Results name runs outside the scan window");
        }
        Scan::Served(served)
    }
}

/// `now` minus `secs`, clamped to the earliest representable time.
fn cutoff(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
