//! In-memory implementation of RunStore.
//!
//! Everything lives behind one lock, so each operation is a transaction:
//! validation happens before any row changes, and a rejected multi-row
//! update leaves the store untouched. All data is lost on drop.

use async_trait::async_trait;
use audition_core::{
    AttemptCompletion, AttemptStatus, BatchSubmission, Condition, ConditionSpec,
    GenerationAttempt, GenerationRun, NewAttempt, NewPrompt, NewRun, Prompt, RunId,
};
use audition_error::{AuditionResult, StoreError, StoreErrorKind};
use audition_interface::RunStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct StoreState {
    conditions: BTreeMap<i64, Condition>,
    prompts: BTreeMap<i64, Prompt>,
    runs: HashMap<RunId, GenerationRun>,
    attempts: BTreeMap<i64, GenerationAttempt>,
    submissions: Vec<BatchSubmission>,
    next_id: i64,
}

impl StoreState {
    fn mint_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn run(&self, run_id: &RunId) -> Result<&GenerationRun, StoreError> {
        self.runs
            .get(run_id)
            .ok_or_else(|| StoreError::new(StoreErrorKind::NotFound(format!("run {}", run_id))))
    }

    fn attempt(&self, id: i64) -> Result<&GenerationAttempt, StoreError> {
        self.attempts
            .get(&id)
            .ok_or_else(|| StoreError::new(StoreErrorKind::NotFound(format!("attempt {}", id))))
    }

    fn check_new_attempt(&self, attempt: &NewAttempt) -> Result<(), StoreError> {
        self.run(&attempt.run_id)?;
        let duplicate = self.attempts.values().any(|existing| {
            existing.status != AttemptStatus::Error
                && (existing.custom_id == attempt.custom_id
                    || (existing.run_id == attempt.run_id
                        && existing.condition_id == attempt.condition_id
                        && existing.prompt_id == attempt.prompt_id
                        && existing.replicate_index == attempt.replicate_index))
        });
        if duplicate {
            return Err(StoreError::new(StoreErrorKind::Conflict(format!(
                "live attempt already exists for {}",
                attempt.custom_id
            ))));
        }
        Ok(())
    }

    fn insert_attempt(&mut self, attempt: &NewAttempt) -> GenerationAttempt {
        let id = self.mint_id();
        let now = Utc::now();
        let row = GenerationAttempt {
            id,
            run_id: attempt.run_id.clone(),
            condition_id: attempt.condition_id,
            prompt_id: attempt.prompt_id,
            replicate_index: attempt.replicate_index,
            provider: attempt.provider,
            custom_id: attempt.custom_id.clone(),
            status: AttemptStatus::Pending,
            request_payload: attempt.request_payload.clone(),
            batch_id: None,
            response_text: None,
            usage: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.attempts.insert(id, row.clone());
        row
    }
}

fn invalid_transition(attempt: &GenerationAttempt, next: AttemptStatus) -> StoreError {
    StoreError::new(StoreErrorKind::InvalidTransition(format!(
        "attempt {} is {}, cannot become {}",
        attempt.id, attempt.status, next
    )))
}

/// In-memory run store for tests and dry runs.
///
/// # Example
///
/// ```
/// use audition_database::InMemoryRunStore;
/// use audition_interface::RunStore;
/// use audition_core::NewPrompt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryRunStore::new();
/// let first = store.upsert_prompt(&NewPrompt::new("Describe the sea.")).await?;
/// let again = store.upsert_prompt(&NewPrompt::new("Describe the sea.")).await?;
/// assert_eq!(first.id, again.id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryRunStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored attempts (for testing).
    pub async fn attempt_count(&self) -> usize {
        self.state.read().await.attempts.len()
    }

    /// Load one attempt (for testing).
    pub async fn get_attempt(&self, id: i64) -> AuditionResult<GenerationAttempt> {
        Ok(self.state.read().await.attempt(id)?.clone())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    #[instrument(skip(self, spec), fields(slug = %spec.slug, version = spec.version))]
    async fn upsert_condition(&self, spec: &ConditionSpec) -> AuditionResult<Condition> {
        let mut state = self.state.write().await;

        let existing = state
            .conditions
            .values()
            .find(|c| c.slug.eq_ignore_ascii_case(&spec.slug) && c.version == spec.version)
            .cloned();

        match existing {
            None => {
                let id = state.mint_id();
                let condition = Condition {
                    id,
                    slug: spec.slug.clone(),
                    version: spec.version,
                    provider: spec.provider,
                    model: spec.model.clone(),
                    temperature: spec.temperature,
                    max_tokens: spec.max_tokens,
                    system_prompt: spec.system_prompt.clone(),
                    prompt_caching: spec.prompt_caching,
                    created_at: Utc::now(),
                };
                state.conditions.insert(id, condition.clone());
                debug!(id, "Inserted condition");
                Ok(condition)
            }
            Some(current) if current.matches_spec(spec) => Ok(current),
            Some(current) => {
                let referenced = state
                    .attempts
                    .values()
                    .any(|attempt| attempt.condition_id == current.id)
                    || state
                        .runs
                        .values()
                        .any(|run| run.condition_id == current.id);
                if referenced {
                    return Err(StoreError::new(StoreErrorKind::ConditionImmutable(format!(
                        "{} v{}",
                        current.slug, current.version
                    )))
                    .into());
                }
                let updated = Condition {
                    slug: spec.slug.clone(),
                    provider: spec.provider,
                    model: spec.model.clone(),
                    temperature: spec.temperature,
                    max_tokens: spec.max_tokens,
                    system_prompt: spec.system_prompt.clone(),
                    prompt_caching: spec.prompt_caching,
                    ..current
                };
                state.conditions.insert(updated.id, updated.clone());
                debug!(id = updated.id, "Updated unreferenced condition");
                Ok(updated)
            }
        }
    }

    async fn get_condition(&self, id: i64) -> AuditionResult<Condition> {
        let state = self.state.read().await;
        state.conditions.get(&id).cloned().ok_or_else(|| {
            StoreError::new(StoreErrorKind::NotFound(format!("condition {}", id))).into()
        })
    }

    async fn get_condition_by_slug(
        &self,
        slug: &str,
        version: Option<i32>,
    ) -> AuditionResult<Condition> {
        let state = self.state.read().await;
        state
            .conditions
            .values()
            .filter(|c| c.slug.eq_ignore_ascii_case(slug))
            .filter(|c| version.is_none_or(|v| c.version == v))
            .max_by_key(|c| c.version)
            .cloned()
            .ok_or_else(|| {
                StoreError::new(StoreErrorKind::NotFound(format!("condition '{}'", slug))).into()
            })
    }

    async fn upsert_prompt(&self, prompt: &NewPrompt) -> AuditionResult<Prompt> {
        let hash = prompt.content_hash();
        let mut state = self.state.write().await;

        if let Some(existing) = state.prompts.values().find(|p| p.content_hash == hash) {
            return Ok(existing.clone());
        }

        let id = state.mint_id();
        let stored = Prompt {
            id,
            content_hash: hash,
            label: prompt.label.clone(),
            body: prompt.body.clone(),
            created_at: Utc::now(),
        };
        state.prompts.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_prompt(&self, id: i64) -> AuditionResult<Prompt> {
        let state = self.state.read().await;
        state.prompts.get(&id).cloned().ok_or_else(|| {
            StoreError::new(StoreErrorKind::NotFound(format!("prompt {}", id))).into()
        })
    }

    async fn create_run(&self, run: &NewRun) -> AuditionResult<GenerationRun> {
        let mut state = self.state.write().await;

        if state.runs.contains_key(&run.id) {
            return Err(
                StoreError::new(StoreErrorKind::Conflict(format!("run {} exists", run.id))).into(),
            );
        }
        if !state.conditions.contains_key(&run.condition_id) {
            return Err(StoreError::new(StoreErrorKind::NotFound(format!(
                "condition {}",
                run.condition_id
            )))
            .into());
        }

        let stored = GenerationRun {
            id: run.id.clone(),
            condition_id: run.condition_id,
            replicate_count: run.replicate_count,
            id_format: run.id_format,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        state.runs.insert(run.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_run(&self, run_id: &RunId) -> AuditionResult<GenerationRun> {
        Ok(self.state.read().await.run(run_id)?.clone())
    }

    async fn record_attempt(&self, attempt: &NewAttempt) -> AuditionResult<GenerationAttempt> {
        let mut state = self.state.write().await;
        state.check_new_attempt(attempt)?;
        Ok(state.insert_attempt(attempt))
    }

    async fn record_attempts(
        &self,
        attempts: &[NewAttempt],
    ) -> AuditionResult<Vec<GenerationAttempt>> {
        let mut state = self.state.write().await;
        for (index, attempt) in attempts.iter().enumerate() {
            state.check_new_attempt(attempt)?;
            if attempts[..index]
                .iter()
                .any(|earlier| earlier.custom_id == attempt.custom_id)
            {
                return Err(StoreError::new(StoreErrorKind::Conflict(format!(
                    "custom id {} repeated in one insert",
                    attempt.custom_id
                )))
                .into());
            }
        }
        Ok(attempts
            .iter()
            .map(|attempt| state.insert_attempt(attempt))
            .collect())
    }

    async fn list_attempts_by_status(
        &self,
        status: AttemptStatus,
    ) -> AuditionResult<Vec<GenerationAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .values()
            .filter(|attempt| attempt.status == status)
            .cloned()
            .collect())
    }

    async fn list_attempts_for_run(
        &self,
        run_id: &RunId,
    ) -> AuditionResult<Vec<GenerationAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .values()
            .filter(|attempt| &attempt.run_id == run_id)
            .cloned()
            .collect())
    }

    #[instrument(skip(self, attempt_ids), fields(count = attempt_ids.len()))]
    async fn mark_attempts_submitted(
        &self,
        attempt_ids: &[i64],
        batch_id: &str,
    ) -> AuditionResult<()> {
        if batch_id.is_empty() {
            return Err(StoreError::new(StoreErrorKind::InvalidTransition(
                "batch_pending requires a batch id".to_string(),
            ))
            .into());
        }

        let mut state = self.state.write().await;
        for id in attempt_ids {
            let attempt = state.attempt(*id)?;
            if attempt.status != AttemptStatus::Pending {
                return Err(invalid_transition(attempt, AttemptStatus::BatchPending).into());
            }
        }

        let now = Utc::now();
        for id in attempt_ids {
            if let Some(attempt) = state.attempts.get_mut(id) {
                attempt.status = AttemptStatus::BatchPending;
                attempt.batch_id = Some(batch_id.to_string());
                attempt.updated_at = now;
            }
        }
        Ok(())
    }

    async fn complete_attempt(
        &self,
        attempt_id: i64,
        completion: &AttemptCompletion,
    ) -> AuditionResult<bool> {
        let mut state = self.state.write().await;
        let current = state.attempt(attempt_id)?;
        if current.status.is_terminal() {
            return Ok(false);
        }
        if current.status != AttemptStatus::BatchPending {
            return Err(invalid_transition(current, AttemptStatus::Completed).into());
        }

        if let Some(attempt) = state.attempts.get_mut(&attempt_id) {
            attempt.status = AttemptStatus::Completed;
            attempt.response_text = Some(completion.response_text.clone());
            attempt.usage = Some(completion.usage);
            attempt.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn fail_attempts(&self, attempt_ids: &[i64], reason: &str) -> AuditionResult<usize> {
        let mut state = self.state.write().await;
        for id in attempt_ids {
            state.attempt(*id)?;
        }

        let now = Utc::now();
        let mut changed = 0;
        for id in attempt_ids {
            if let Some(attempt) = state.attempts.get_mut(id)
                && !attempt.status.is_terminal()
            {
                attempt.status = AttemptStatus::Error;
                attempt.error_message = Some(reason.to_string());
                attempt.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    #[instrument(skip(self))]
    async fn update_attempts_batch_id(
        &self,
        run_id: &RunId,
        batch_id: &str,
    ) -> AuditionResult<usize> {
        let mut state = self.state.write().await;
        state.run(run_id)?;

        let now = Utc::now();
        let mut changed = 0;
        for attempt in state.attempts.values_mut() {
            if &attempt.run_id == run_id && attempt.status == AttemptStatus::BatchPending {
                attempt.batch_id = Some(batch_id.to_string());
                attempt.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    #[instrument(skip(self, assignments), fields(count = assignments.len()))]
    async fn reassign_attempts(
        &self,
        run_id: &RunId,
        assignments: &[(i64, String)],
    ) -> AuditionResult<usize> {
        let mut state = self.state.write().await;
        for (id, batch_id) in assignments {
            let attempt = state.attempt(*id)?;
            if &attempt.run_id != run_id {
                return Err(StoreError::new(StoreErrorKind::Conflict(format!(
                    "attempt {} belongs to run {}, not {}",
                    id, attempt.run_id, run_id
                )))
                .into());
            }
            if attempt.status != AttemptStatus::BatchPending || batch_id.is_empty() {
                return Err(invalid_transition(attempt, AttemptStatus::BatchPending).into());
            }
        }

        let now = Utc::now();
        for (id, batch_id) in assignments {
            if let Some(attempt) = state.attempts.get_mut(id) {
                attempt.batch_id = Some(batch_id.clone());
                attempt.updated_at = now;
            }
        }
        Ok(assignments.len())
    }

    #[instrument(skip(self))]
    async fn mark_run_error(&self, run_id: &RunId, reason: &str) -> AuditionResult<()> {
        let mut state = self.state.write().await;
        state.run(run_id)?;

        let now = Utc::now();
        for attempt in state.attempts.values_mut() {
            if &attempt.run_id == run_id && !attempt.status.is_terminal() {
                attempt.status = AttemptStatus::Error;
                attempt.error_message = Some(reason.to_string());
                attempt.updated_at = now;
            }
        }
        if let Some(run) = state.runs.get_mut(run_id) {
            run.error_message = Some(reason.to_string());
            run.completed_at.get_or_insert(now);
        }
        Ok(())
    }

    async fn mark_run_completed(
        &self,
        run_id: &RunId,
        error: Option<&str>,
    ) -> AuditionResult<()> {
        let mut state = self.state.write().await;
        state.run(run_id)?;
        if let Some(run) = state.runs.get_mut(run_id) {
            run.completed_at.get_or_insert(Utc::now());
            if let Some(error) = error {
                run.error_message = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn record_batch_submission(&self, submission: &BatchSubmission) -> AuditionResult<()> {
        let mut state = self.state.write().await;
        if state
            .submissions
            .iter()
            .any(|existing| existing.batch_id == submission.batch_id)
        {
            debug!(batch_id = %submission.batch_id, "Submission already recorded");
            return Ok(());
        }
        state.submissions.push(submission.clone());
        Ok(())
    }

    async fn list_batch_submissions_since(
        &self,
        since: DateTime<Utc>,
    ) -> AuditionResult<Vec<BatchSubmission>> {
        let state = self.state.read().await;
        let mut submissions: Vec<_> = state
            .submissions
            .iter()
            .filter(|submission| submission.submitted_at >= since)
            .cloned()
            .collect();
        submissions.sort_by_key(|submission| submission.submitted_at);
        Ok(submissions)
    }
}
