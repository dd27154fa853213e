//! Turning "condition × prompts × replicates" into provider batches.

use crate::{BatchMetrics, ChunkCaps, PlanItem, plan_chunks};
use audition_core::{
    BatchRequest, BatchSubmission, Condition, CustomId, CustomIdFormat, GenerationAttempt,
    NewAttempt, NewRun, Prompt, ProviderKind, RunId, estimate_tokens,
};
use audition_error::{
    AuditionError, AuditionResult, OrchestratorError, OrchestratorErrorKind, RetryableError,
};
use audition_interface::{BatchClient, RunStore};
use audition_providers::ProviderRegistry;
use audition_rate_limit::{Admission, AuditionConfig, RateTracker};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_retry2::{Retry, RetryError, strategy::ExponentialBackoff, strategy::jitter};
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on a single remote cancel call.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Reason stamped on attempts and runs cancelled locally.
pub const CANCELLED_REASON: &str = "cancelled";

/// Shape of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Replicates per prompt
    pub replicates: u32,
    /// Custom id layout for every attempt of the run
    pub id_format: CustomIdFormat,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            replicates: 1,
            id_format: CustomIdFormat::WithCondition,
        }
    }
}

/// What `run_batch` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// The new run
    pub run_id: RunId,
    /// Attempts recorded
    pub attempts: usize,
    /// Attempts now `batch_pending`
    pub submitted: usize,
    /// Attempts that failed submission
    pub failed: usize,
    /// Provider batch ids, in submission order
    pub batch_ids: Vec<String>,
    /// The run was cancelled while it was being submitted
    pub cancelled: bool,
}

/// Local result of `cancel_run`; remote cancels continue in the background.
#[derive(Debug)]
pub struct RunCancellation {
    /// Batches a remote cancel was sent for
    pub batch_ids: Vec<String>,
    /// Detached remote cancel tasks
    pub remote: Vec<JoinHandle<()>>,
}

/// Submits runs through the single admission gate.
///
/// Every attempt row is written `pending` before any network call, so a
/// crash mid-submission leaves a trace. Each chunk is submitted with
/// bounded retries for transient errors, and every call, retries included,
/// first waits on the shared [`RateTracker`]. The chunk's attempts then move
/// to `batch_pending` or fail with the causing message. A run cancelled
/// mid-submission stops there, and the batch just accepted is cancelled
/// remotely.
///
/// # Example
///
/// ```rust,ignore
/// use audition_orchestrator::{Orchestrator, RunOptions};
///
/// let orchestrator = Orchestrator::new(store, registry, tracker, config);
/// let summary = orchestrator
///     .run_batch(&condition, &prompts, RunOptions { replicates: 5, ..Default::default() })
///     .await?;
/// println!("run {} submitted in {} batches", summary.run_id, summary.batch_ids.len());
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    registry: ProviderRegistry,
    tracker: Arc<RateTracker>,
    config: AuditionConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("providers", &self.registry.providers())
            .field("orchestrator", &self.config.orchestrator)
            .finish_non_exhaustive()
    }
}

/// How one chunk ended.
enum ChunkOutcome {
    /// Attempts are `batch_pending` under this batch
    Submitted(String),
    /// Attempts were failed with this reason
    Failed(String),
    /// The run was cancelled after the provider accepted this batch
    Cancelled(String),
}

struct Chunk<'a> {
    attempts: &'a [GenerationAttempt],
    requests: &'a [BatchRequest],
    tokens: u64,
}

impl Orchestrator {
    /// Create an orchestrator. The tracker should be shared by every
    /// submitter in the process.
    pub fn new(
        store: Arc<dyn RunStore>,
        registry: ProviderRegistry,
        tracker: Arc<RateTracker>,
        config: AuditionConfig,
    ) -> Self {
        Self {
            store,
            registry,
            tracker,
            config,
        }
    }

    fn client_for(&self, provider: ProviderKind) -> Result<Arc<dyn BatchClient>, OrchestratorError> {
        self.registry.get(provider).ok_or_else(|| {
            OrchestratorError::new(OrchestratorErrorKind::ProviderNotConfigured(
                provider.to_string(),
            ))
        })
    }

    /// Run `condition` over `prompts`, `options.replicates` times each.
    ///
    /// Submission failures are recorded on the affected attempts rather
    /// than returned; the summary reports how many failed.
    ///
    /// # Errors
    ///
    /// Fails before creating anything when there is no work or no client
    /// for the condition's provider, and on store errors.
    #[instrument(skip(self, condition, prompts), fields(condition = %condition.slug, prompts = prompts.len(), replicates = options.replicates))]
    pub async fn run_batch(
        &self,
        condition: &Condition,
        prompts: &[Prompt],
        options: RunOptions,
    ) -> AuditionResult<RunSummary> {
        if prompts.is_empty() || options.replicates == 0 {
            return Err(OrchestratorError::new(OrchestratorErrorKind::EmptyRun(format!(
                "{} prompts x {} replicates",
                prompts.len(),
                options.replicates
            )))
            .into());
        }
        let client = self.client_for(condition.provider)?;

        let run_id = RunId::generate();
        let mut new_attempts = Vec::with_capacity(prompts.len() * options.replicates as usize);
        let mut requests = Vec::with_capacity(new_attempts.capacity());
        let mut items = Vec::with_capacity(new_attempts.capacity());
        for prompt in prompts {
            let tokens = estimate_tokens(&prompt.body)
                + condition
                    .system_prompt
                    .as_deref()
                    .map_or(0, estimate_tokens);
            for replicate in 0..options.replicates {
                let custom_id = CustomId::for_format(
                    options.id_format,
                    run_id.clone(),
                    condition.id,
                    prompt.id,
                    replicate,
                )
                .encode()?;
                let request = client.build_request(condition, prompt, &custom_id)?;
                items.push(PlanItem {
                    group: prompt.id,
                    bytes: request.approx_bytes(),
                    tokens,
                });
                new_attempts.push(NewAttempt {
                    run_id: run_id.clone(),
                    condition_id: condition.id,
                    prompt_id: prompt.id,
                    replicate_index: replicate,
                    provider: condition.provider,
                    custom_id,
                    request_payload: request.body.clone(),
                });
                requests.push(request);
            }
        }

        self.store
            .create_run(&NewRun {
                id: run_id.clone(),
                condition_id: condition.id,
                replicate_count: options.replicates,
                id_format: options.id_format,
            })
            .await?;
        let attempts = self.store.record_attempts(&new_attempts).await?;
        info!(run_id = %run_id, attempts = attempts.len(), "Recorded pending attempts");

        let admission = self
            .config
            .limits_for(condition.provider.as_ref(), &condition.model);
        let limits = client.limits();
        let caps = ChunkCaps {
            max_requests: *limits.max_requests(),
            max_bytes: *limits.max_bytes(),
            max_tokens: match admission {
                Admission::Throttled(limits) => Some(limits.tokens_per_minute),
                Admission::SelfManaged => None,
            },
        };

        let mut summary = RunSummary {
            run_id: run_id.clone(),
            attempts: attempts.len(),
            submitted: 0,
            failed: 0,
            batch_ids: Vec::new(),
            cancelled: false,
        };
        let mut last_failure = None;
        for range in plan_chunks(&items, &caps) {
            let chunk = Chunk {
                attempts: &attempts[range.clone()],
                requests: &requests[range.clone()],
                tokens: items[range].iter().map(|item| item.tokens).sum(),
            };
            match self
                .submit_chunk(client.as_ref(), condition, &run_id, &admission, &chunk)
                .await?
            {
                ChunkOutcome::Submitted(batch_id) => {
                    summary.submitted += chunk.attempts.len();
                    summary.batch_ids.push(batch_id);
                }
                ChunkOutcome::Failed(reason) => {
                    summary.failed += chunk.attempts.len();
                    last_failure = Some(reason);
                }
                ChunkOutcome::Cancelled(batch_id) => {
                    summary.batch_ids.push(batch_id);
                    summary.cancelled = true;
                    break;
                }
            }
        }

        if summary.submitted == 0 && !summary.cancelled {
            let reason = last_failure.unwrap_or_else(|| "no batch submitted".to_string());
            self.store
                .mark_run_completed(&run_id, Some(&format!("all submissions failed: {}", reason)))
                .await?;
        }
        info!(
            run_id = %run_id,
            submitted = summary.submitted,
            failed = summary.failed,
            batches = summary.batch_ids.len(),
            "Run submitted"
        );
        Ok(summary)
    }

    /// Submit and record one chunk.
    ///
    /// The error is a store failure; every other ending is reported in the
    /// outcome.
    async fn submit_chunk(
        &self,
        client: &dyn BatchClient,
        condition: &Condition,
        run_id: &RunId,
        admission: &Admission,
        chunk: &Chunk<'_>,
    ) -> AuditionResult<ChunkOutcome> {
        let ids: Vec<i64> = chunk.attempts.iter().map(|attempt| attempt.id).collect();
        let metrics = BatchMetrics::get();

        match self
            .submit_with_retry(client, condition, admission, chunk)
            .await
        {
            Ok(batch_id) => {
                self.store
                    .record_batch_submission(&BatchSubmission {
                        batch_id: batch_id.clone(),
                        provider: condition.provider,
                        run_id: run_id.clone(),
                        request_count: u32::try_from(ids.len()).unwrap_or(u32::MAX),
                        submitted_at: Utc::now(),
                    })
                    .await?;
                if let Err(e) = self.store.mark_attempts_submitted(&ids, &batch_id).await {
                    if self.is_cancelled(run_id).await? {
                        warn!(
                            run_id = %run_id,
                            batch_id = %batch_id,
                            "Run cancelled during submission; cancelling accepted batch"
                        );
                        cancel_remote(client, &batch_id).await;
                        return Ok(ChunkOutcome::Cancelled(batch_id));
                    }
                    error!(
                        batch_id = %batch_id,
                        error = %e,
                        "Batch accepted but attempts could not be marked submitted"
                    );
                    return Err(e);
                }
                metrics.record_submission(condition.provider, &condition.model, ids.len());
                info!(batch_id = %batch_id, requests = ids.len(), "Submitted batch");
                Ok(ChunkOutcome::Submitted(batch_id))
            }
            Err(e) => {
                let reason = format!("submission failed: {}", e);
                warn!(run_id = %run_id, requests = ids.len(), error = %e, "Submission failed");
                self.store.fail_attempts(&ids, &reason).await?;
                metrics.record_submit_failure(condition.provider, &condition.model);
                Ok(ChunkOutcome::Failed(reason))
            }
        }
    }

    async fn is_cancelled(&self, run_id: &RunId) -> AuditionResult<bool> {
        let run = self.store.get_run(run_id).await?;
        Ok(run.error_message.as_deref() == Some(CANCELLED_REASON))
    }

    /// Every attempt, retries included, passes the rate tracker first.
    async fn submit_with_retry(
        &self,
        client: &dyn BatchClient,
        condition: &Condition,
        admission: &Admission,
        chunk: &Chunk<'_>,
    ) -> AuditionResult<String> {
        let settings = &self.config.orchestrator;
        let retry_strategy = ExponentialBackoff::from_millis(settings.retry_backoff_ms.max(1))
            .factor(2)
            .max_delay(Duration::from_secs(60))
            .map(jitter)
            .take(settings.max_submit_retries);

        Retry::spawn(retry_strategy, move || async move {
            let admitted = self
                .tracker
                .acquire(
                    condition.provider.as_ref(),
                    &condition.model,
                    chunk.tokens,
                    admission,
                )
                .await;
            match admitted {
                Ok(waited) => self.note_wait(condition, waited),
                Err(e) => return Err(RetryError::Permanent(AuditionError::from(e))),
            }

            match client.submit(chunk.requests).await {
                Ok(batch_id) => Ok(batch_id),
                Err(e) if e.is_retryable() => {
                    warn!("Transient submission error, will retry: {}", e);
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(e) => Err(RetryError::Permanent(e)),
            }
        })
        .await
    }

    fn note_wait(&self, condition: &Condition, waited: Duration) {
        if waited.is_zero() {
            return;
        }
        BatchMetrics::get().record_wait(condition.provider, &condition.model, waited.as_secs_f64());
        if waited.as_secs() > self.config.orchestrator.cache_ttl_secs {
            debug!(
                waited_secs = waited.as_secs(),
                "Admission wait exceeded the prompt cache lifetime"
            );
        }
    }

    /// Cancel a run.
    ///
    /// Local state changes first: the run and every non-terminal attempt
    /// become `error` with reason `cancelled`. Provider cancels for the
    /// run's outstanding batches are then spawned as detached,
    /// timeout-bounded tasks; their failures are only logged.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: &RunId) -> AuditionResult<RunCancellation> {
        self.store.get_run(run_id).await.map_err(|_| {
            OrchestratorError::new(OrchestratorErrorKind::RunNotFound(run_id.to_string()))
        })?;

        let outstanding: BTreeSet<(ProviderKind, String)> = self
            .store
            .list_attempts_for_run(run_id)
            .await?
            .into_iter()
            .filter(|attempt| !attempt.status.is_terminal())
            .filter_map(|attempt| attempt.batch_id.map(|batch_id| (attempt.provider, batch_id)))
            .collect();

        self.store.mark_run_error(run_id, CANCELLED_REASON).await?;
        info!(run_id = %run_id, batches = outstanding.len(), "Run cancelled locally");

        let mut cancellation = RunCancellation {
            batch_ids: Vec::new(),
            remote: Vec::new(),
        };
        for (provider, batch_id) in outstanding {
            let Some(client) = self.registry.get(provider) else {
                warn!(batch_id = %batch_id, provider = %provider, "No client to cancel batch");
                continue;
            };
            cancellation.batch_ids.push(batch_id.clone());
            cancellation.remote.push(tokio::spawn(async move {
                cancel_remote(client.as_ref(), &batch_id).await;
            }));
        }
        Ok(cancellation)
    }
}

/// Best-effort provider cancel, bounded by [`CANCEL_TIMEOUT`].
async fn cancel_remote(client: &dyn BatchClient, batch_id: &str) {
    match tokio::time::timeout(CANCEL_TIMEOUT, client.cancel(batch_id)).await {
        Ok(Ok(())) => info!(batch_id, "Provider cancel requested"),
        Ok(Err(e)) => warn!(batch_id, error = %e, "Provider cancel failed"),
        Err(_) => warn!(batch_id, "Provider cancel timed out"),
    }
}
