//! The run/result store contract.

use async_trait::async_trait;
use audition_core::{
    AttemptCompletion, AttemptStatus, BatchSubmission, Condition, ConditionSpec,
    GenerationAttempt, GenerationRun, NewAttempt, NewPrompt, NewRun, Prompt, RunId,
};
use audition_error::AuditionResult;
use chrono::{DateTime, Utc};

/// Durable record of conditions, prompts, runs, attempts, and submissions.
///
/// The store is the single source of truth. Every multi-row mutation is
/// atomic: either all rows change or none do. Attempt transitions follow
/// [`AttemptStatus::can_transition_to`]; terminal attempts are never
/// rewritten.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a condition if its slug/version is absent, else return or
    /// update the existing row.
    ///
    /// Fails with `ConditionImmutable` when the stored condition differs
    /// from `spec` and any attempt already references it.
    async fn upsert_condition(&self, spec: &ConditionSpec) -> AuditionResult<Condition>;

    /// Load a condition by id.
    async fn get_condition(&self, id: i64) -> AuditionResult<Condition>;

    /// Load a condition by slug, case-insensitively. `None` selects the
    /// highest version.
    async fn get_condition_by_slug(
        &self,
        slug: &str,
        version: Option<i32>,
    ) -> AuditionResult<Condition>;

    /// Insert a prompt unless one with the same content hash exists.
    async fn upsert_prompt(&self, prompt: &NewPrompt) -> AuditionResult<Prompt>;

    /// Load a prompt by id.
    async fn get_prompt(&self, id: i64) -> AuditionResult<Prompt>;

    /// Create a run. Fails with `Conflict` if the id is taken.
    async fn create_run(&self, run: &NewRun) -> AuditionResult<GenerationRun>;

    /// Load a run.
    async fn get_run(&self, run_id: &RunId) -> AuditionResult<GenerationRun>;

    /// Record one attempt in `pending` state.
    async fn record_attempt(&self, attempt: &NewAttempt) -> AuditionResult<GenerationAttempt>;

    /// Record many attempts in `pending` state, atomically.
    async fn record_attempts(
        &self,
        attempts: &[NewAttempt],
    ) -> AuditionResult<Vec<GenerationAttempt>> {
        let mut recorded = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            recorded.push(self.record_attempt(attempt).await?);
        }
        Ok(recorded)
    }

    /// Every attempt currently in `status`, oldest first.
    async fn list_attempts_by_status(
        &self,
        status: AttemptStatus,
    ) -> AuditionResult<Vec<GenerationAttempt>>;

    /// Every attempt of a run, oldest first.
    async fn list_attempts_for_run(&self, run_id: &RunId)
    -> AuditionResult<Vec<GenerationAttempt>>;

    /// Move `pending` attempts to `batch_pending` under `batch_id`.
    ///
    /// Fails with `InvalidTransition` and changes nothing if any attempt is
    /// not `pending`.
    async fn mark_attempts_submitted(
        &self,
        attempt_ids: &[i64],
        batch_id: &str,
    ) -> AuditionResult<()>;

    /// Record a result for a `batch_pending` attempt.
    ///
    /// Returns `false` and changes nothing when the attempt is already
    /// terminal, which makes re-polling idempotent.
    async fn complete_attempt(
        &self,
        attempt_id: i64,
        completion: &AttemptCompletion,
    ) -> AuditionResult<bool>;

    /// Move non-terminal attempts to `error` with `reason`. Terminal
    /// attempts are skipped. Returns how many changed.
    async fn fail_attempts(&self, attempt_ids: &[i64], reason: &str) -> AuditionResult<usize>;

    /// Repoint every `batch_pending` attempt of a run at `batch_id`,
    /// atomically. Returns how many changed.
    async fn update_attempts_batch_id(
        &self,
        run_id: &RunId,
        batch_id: &str,
    ) -> AuditionResult<usize>;

    /// Repoint individual `batch_pending` attempts of one run, atomically.
    ///
    /// Used when a run's requests were spread over several batches. Fails and
    /// changes nothing if any attempt does not belong to `run_id` or is not
    /// `batch_pending`.
    async fn reassign_attempts(
        &self,
        run_id: &RunId,
        assignments: &[(i64, String)],
    ) -> AuditionResult<usize>;

    /// Flag a run for operator disposition: record `reason` on the run and
    /// move its non-terminal attempts to `error`.
    async fn mark_run_error(&self, run_id: &RunId, reason: &str) -> AuditionResult<()>;

    /// Completion bookkeeping once every attempt is terminal.
    async fn mark_run_completed(&self, run_id: &RunId, error: Option<&str>)
    -> AuditionResult<()>;

    /// Record a successful submission. Idempotent on batch id.
    async fn record_batch_submission(&self, submission: &BatchSubmission) -> AuditionResult<()>;

    /// Submissions at or after `since`, oldest first.
    async fn list_batch_submissions_since(
        &self,
        since: DateTime<Utc>,
    ) -> AuditionResult<Vec<BatchSubmission>>;
}
