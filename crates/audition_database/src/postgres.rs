//! PostgreSQL implementation of RunStore.

use crate::models::{
    AttemptCompletionRow, AttemptRow, ConditionRow, NewAttemptRow, NewConditionRow, NewPromptRow,
    NewRunRow, PromptRow, RunRow, SubmissionRow,
};
use crate::schema::{
    batch_submissions, conditions, generation_attempts, generation_runs, prompts,
};
use crate::{establish_connection, run_migrations};
use async_trait::async_trait;
use audition_core::{
    AttemptCompletion, AttemptStatus, BatchSubmission, Condition, ConditionSpec,
    GenerationAttempt, GenerationRun, NewAttempt, NewPrompt, NewRun, Prompt, RunId,
};
use audition_error::{AuditionResult, StoreError, StoreErrorKind};
use audition_interface::RunStore;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::Text;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

diesel::define_sql_function!(fn lower(x: Text) -> Text);

const LIVE_STATUSES: [&str; 2] = ["pending", "batch_pending"];

fn status(value: AttemptStatus) -> &'static str {
    value.into()
}

fn into_attempts(rows: Vec<AttemptRow>) -> Result<Vec<GenerationAttempt>, StoreError> {
    rows.into_iter().map(GenerationAttempt::try_from).collect()
}

/// Lock the rows for `ids` and fail unless every one exists.
fn lock_attempts(conn: &mut PgConnection, ids: &[i64]) -> Result<Vec<AttemptRow>, StoreError> {
    let rows: Vec<AttemptRow> = generation_attempts::table
        .filter(generation_attempts::id.eq_any(ids))
        .select(AttemptRow::as_select())
        .for_update()
        .load(conn)?;
    if let Some(missing) = ids.iter().find(|id| !rows.iter().any(|row| row.id == **id)) {
        return Err(StoreError::new(StoreErrorKind::NotFound(format!(
            "attempt {}",
            missing
        ))));
    }
    Ok(rows)
}

fn invalid_transition(row: &AttemptRow, next: AttemptStatus) -> StoreError {
    StoreError::new(StoreErrorKind::InvalidTransition(format!(
        "attempt {} is {}, cannot become {}",
        row.id, row.status, next
    )))
}

fn load_run(conn: &mut PgConnection, run_id: &RunId) -> Result<RunRow, StoreError> {
    generation_runs::table
        .find(run_id.as_str())
        .select(RunRow::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| StoreError::new(StoreErrorKind::NotFound(format!("run {}", run_id))))
}

/// PostgreSQL run store using Diesel ORM.
///
/// Each operation runs in its own transaction; attempt rows touched by a
/// state change are locked with `SELECT ... FOR UPDATE` first, so a poller
/// and a submitter updating the same attempts serialize on the database.
///
/// # Example
///
/// ```no_run
/// use audition_database::PostgresRunStore;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresRunStore::connect()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresRunStore {
    conn: Arc<Mutex<PgConnection>>,
}

impl std::fmt::Debug for PostgresRunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRunStore").finish_non_exhaustive()
    }
}

impl PostgresRunStore {
    /// Wrap an open connection.
    pub fn new(conn: PgConnection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Share a connection with other repositories.
    pub fn from_arc(conn: Arc<Mutex<PgConnection>>) -> Self {
        Self { conn }
    }

    /// Connect via `DATABASE_URL` and apply pending migrations.
    pub fn connect() -> AuditionResult<Self> {
        let mut conn = establish_connection()?;
        run_migrations(&mut conn)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self, spec), fields(slug = %spec.slug, version = spec.version))]
    async fn upsert_condition(&self, spec: &ConditionSpec) -> AuditionResult<Condition> {
        let row = NewConditionRow::try_from(spec)?;
        let mut conn = self.conn.lock().await;

        let condition = conn.transaction::<_, StoreError, _>(|conn| {
            let existing: Option<ConditionRow> = conditions::table
                .filter(lower(conditions::slug).eq(spec.slug.to_lowercase()))
                .filter(conditions::version.eq(spec.version))
                .select(ConditionRow::as_select())
                .for_update()
                .first(conn)
                .optional()?;

            let Some(existing) = existing else {
                let inserted: ConditionRow = diesel::insert_into(conditions::table)
                    .values(&row)
                    .returning(ConditionRow::as_returning())
                    .get_result(conn)?;
                debug!(id = inserted.id, "Inserted condition");
                return Condition::try_from(inserted);
            };

            let current = Condition::try_from(existing)?;
            if current.matches_spec(spec) {
                return Ok(current);
            }

            let referenced = diesel::select(diesel::dsl::exists(
                generation_runs::table.filter(generation_runs::condition_id.eq(current.id)),
            ))
            .get_result::<bool>(conn)?
                || diesel::select(diesel::dsl::exists(
                    generation_attempts::table
                        .filter(generation_attempts::condition_id.eq(current.id)),
                ))
                .get_result::<bool>(conn)?;
            if referenced {
                return Err(StoreError::new(StoreErrorKind::ConditionImmutable(format!(
                    "{} v{}",
                    current.slug, current.version
                ))));
            }

            let updated: ConditionRow = diesel::update(conditions::table.find(current.id))
                .set(&row)
                .returning(ConditionRow::as_returning())
                .get_result(conn)?;
            debug!(id = updated.id, "Updated unreferenced condition");
            Condition::try_from(updated)
        })?;

        Ok(condition)
    }

    async fn get_condition(&self, id: i64) -> AuditionResult<Condition> {
        let mut conn = self.conn.lock().await;
        let row: ConditionRow = conditions::table
            .find(id)
            .select(ConditionRow::as_select())
            .first(&mut *conn)
            .map_err(StoreError::from)?;
        Ok(Condition::try_from(row)?)
    }

    async fn get_condition_by_slug(
        &self,
        slug: &str,
        version: Option<i32>,
    ) -> AuditionResult<Condition> {
        let mut conn = self.conn.lock().await;
        let mut query = conditions::table
            .select(ConditionRow::as_select())
            .filter(lower(conditions::slug).eq(slug.to_lowercase()))
            .into_boxed();
        if let Some(version) = version {
            query = query.filter(conditions::version.eq(version));
        }

        let row: ConditionRow = query
            .order(conditions::version.desc())
            .first(&mut *conn)
            .optional()
            .map_err(StoreError::from)?
            .ok_or_else(|| {
                StoreError::new(StoreErrorKind::NotFound(format!("condition '{}'", slug)))
            })?;
        Ok(Condition::try_from(row)?)
    }

    async fn upsert_prompt(&self, prompt: &NewPrompt) -> AuditionResult<Prompt> {
        let hash = prompt.content_hash();
        let mut conn = self.conn.lock().await;

        let row = conn.transaction::<_, StoreError, _>(|conn| {
            diesel::insert_into(prompts::table)
                .values(&NewPromptRow {
                    content_hash: hash.clone(),
                    label: prompt.label.as_deref(),
                    body: &prompt.body,
                })
                .on_conflict(prompts::content_hash)
                .do_nothing()
                .execute(conn)?;

            Ok(prompts::table
                .filter(prompts::content_hash.eq(&hash))
                .select(PromptRow::as_select())
                .first(conn)?)
        })?;

        Ok(row.into())
    }

    async fn get_prompt(&self, id: i64) -> AuditionResult<Prompt> {
        let mut conn = self.conn.lock().await;
        let row: PromptRow = prompts::table
            .find(id)
            .select(PromptRow::as_select())
            .first(&mut *conn)
            .map_err(StoreError::from)?;
        Ok(row.into())
    }

    async fn create_run(&self, run: &NewRun) -> AuditionResult<GenerationRun> {
        let new_row = NewRunRow::try_from(run)?;
        let mut conn = self.conn.lock().await;
        let row: RunRow = diesel::insert_into(generation_runs::table)
            .values(&new_row)
            .returning(RunRow::as_returning())
            .get_result(&mut *conn)
            .map_err(StoreError::from)?;
        Ok(GenerationRun::try_from(row)?)
    }

    async fn get_run(&self, run_id: &RunId) -> AuditionResult<GenerationRun> {
        let mut conn = self.conn.lock().await;
        let row = load_run(&mut conn, run_id)?;
        Ok(GenerationRun::try_from(row)?)
    }

    async fn record_attempt(&self, attempt: &NewAttempt) -> AuditionResult<GenerationAttempt> {
        let new_row = NewAttemptRow::try_from(attempt)?;
        let mut conn = self.conn.lock().await;
        let row: AttemptRow = diesel::insert_into(generation_attempts::table)
            .values(&new_row)
            .returning(AttemptRow::as_returning())
            .get_result(&mut *conn)
            .map_err(StoreError::from)?;
        Ok(GenerationAttempt::try_from(row)?)
    }

    #[instrument(skip(self, attempts), fields(count = attempts.len()))]
    async fn record_attempts(
        &self,
        attempts: &[NewAttempt],
    ) -> AuditionResult<Vec<GenerationAttempt>> {
        let new_rows = attempts
            .iter()
            .map(NewAttemptRow::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let mut conn = self.conn.lock().await;

        let rows = conn.transaction::<_, StoreError, _>(|conn| {
            Ok(diesel::insert_into(generation_attempts::table)
                .values(&new_rows)
                .returning(AttemptRow::as_returning())
                .get_results(conn)?)
        })?;

        Ok(into_attempts(rows)?)
    }

    async fn list_attempts_by_status(
        &self,
        status_filter: AttemptStatus,
    ) -> AuditionResult<Vec<GenerationAttempt>> {
        let mut conn = self.conn.lock().await;
        let rows: Vec<AttemptRow> = generation_attempts::table
            .filter(generation_attempts::status.eq(status(status_filter)))
            .order(generation_attempts::id.asc())
            .select(AttemptRow::as_select())
            .load(&mut *conn)
            .map_err(StoreError::from)?;
        Ok(into_attempts(rows)?)
    }

    async fn list_attempts_for_run(
        &self,
        run_id: &RunId,
    ) -> AuditionResult<Vec<GenerationAttempt>> {
        let mut conn = self.conn.lock().await;
        let rows: Vec<AttemptRow> = generation_attempts::table
            .filter(generation_attempts::run_id.eq(run_id.as_str()))
            .order(generation_attempts::id.asc())
            .select(AttemptRow::as_select())
            .load(&mut *conn)
            .map_err(StoreError::from)?;
        Ok(into_attempts(rows)?)
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

        let mut conn = self.conn.lock().await;
        conn.transaction::<_, StoreError, _>(|conn| {
            let rows = lock_attempts(conn, attempt_ids)?;
            if let Some(row) = rows
                .iter()
                .find(|row| row.status != status(AttemptStatus::Pending))
            {
                return Err(invalid_transition(row, AttemptStatus::BatchPending));
            }

            diesel::update(
                generation_attempts::table.filter(generation_attempts::id.eq_any(attempt_ids)),
            )
            .set((
                generation_attempts::status.eq(status(AttemptStatus::BatchPending)),
                generation_attempts::batch_id.eq(batch_id),
                generation_attempts::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }

    async fn complete_attempt(
        &self,
        attempt_id: i64,
        completion: &AttemptCompletion,
    ) -> AuditionResult<bool> {
        let mut conn = self.conn.lock().await;
        let changed = conn.transaction::<_, StoreError, _>(|conn| {
            let rows = lock_attempts(conn, &[attempt_id])?;
            let Some(row) = rows.first() else {
                return Ok(false);
            };
            let current = row
                .status
                .parse::<AttemptStatus>()
                .map_err(|e| StoreError::new(StoreErrorKind::Serialization(e.to_string())))?;
            if current.is_terminal() {
                return Ok(false);
            }
            if current != AttemptStatus::BatchPending {
                return Err(invalid_transition(row, AttemptStatus::Completed));
            }

            diesel::update(generation_attempts::table.find(attempt_id))
                .set(&AttemptCompletionRow::new(
                    &completion.response_text,
                    &completion.usage,
                ))
                .execute(conn)?;
            Ok(true)
        })?;
        Ok(changed)
    }

    async fn fail_attempts(&self, attempt_ids: &[i64], reason: &str) -> AuditionResult<usize> {
        let mut conn = self.conn.lock().await;
        let changed = conn.transaction::<_, StoreError, _>(|conn| {
            lock_attempts(conn, attempt_ids)?;
            Ok(diesel::update(
                generation_attempts::table
                    .filter(generation_attempts::id.eq_any(attempt_ids))
                    .filter(generation_attempts::status.eq_any(LIVE_STATUSES)),
            )
            .set((
                generation_attempts::status.eq(status(AttemptStatus::Error)),
                generation_attempts::error_message.eq(reason),
                generation_attempts::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?)
        })?;
        Ok(changed)
    }

    #[instrument(skip(self))]
    async fn update_attempts_batch_id(
        &self,
        run_id: &RunId,
        batch_id: &str,
    ) -> AuditionResult<usize> {
        let mut conn = self.conn.lock().await;
        let changed = conn.transaction::<_, StoreError, _>(|conn| {
            load_run(conn, run_id)?;
            Ok(diesel::update(
                generation_attempts::table
                    .filter(generation_attempts::run_id.eq(run_id.as_str()))
                    .filter(
                        generation_attempts::status.eq(status(AttemptStatus::BatchPending)),
                    ),
            )
            .set((
                generation_attempts::batch_id.eq(batch_id),
                generation_attempts::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?)
        })?;
        Ok(changed)
    }

    #[instrument(skip(self, assignments), fields(count = assignments.len()))]
    async fn reassign_attempts(
        &self,
        run_id: &RunId,
        assignments: &[(i64, String)],
    ) -> AuditionResult<usize> {
        let ids: Vec<i64> = assignments.iter().map(|(id, _)| *id).collect();
        let mut conn = self.conn.lock().await;

        let changed = conn.transaction::<_, StoreError, _>(|conn| {
            let rows = lock_attempts(conn, &ids)?;
            for row in &rows {
                if row.run_id != run_id.as_str() {
                    return Err(StoreError::new(StoreErrorKind::Conflict(format!(
                        "attempt {} belongs to run {}, not {}",
                        row.id, row.run_id, run_id
                    ))));
                }
                if row.status != status(AttemptStatus::BatchPending) {
                    return Err(invalid_transition(row, AttemptStatus::BatchPending));
                }
            }

            let now = Utc::now();
            for (id, batch_id) in assignments {
                if batch_id.is_empty() {
                    return Err(StoreError::new(StoreErrorKind::InvalidTransition(format!(
                        "attempt {} reassigned to an empty batch id",
                        id
                    ))));
                }
                diesel::update(generation_attempts::table.find(*id))
                    .set((
                        generation_attempts::batch_id.eq(batch_id),
                        generation_attempts::updated_at.eq(now),
                    ))
                    .execute(conn)?;
            }
            Ok(assignments.len())
        })?;
        Ok(changed)
    }

    #[instrument(skip(self))]
    async fn mark_run_error(&self, run_id: &RunId, reason: &str) -> AuditionResult<()> {
        let mut conn = self.conn.lock().await;
        conn.transaction::<_, StoreError, _>(|conn| {
            let run = load_run(conn, run_id)?;
            let now = Utc::now();

            diesel::update(
                generation_attempts::table
                    .filter(generation_attempts::run_id.eq(run_id.as_str()))
                    .filter(generation_attempts::status.eq_any(LIVE_STATUSES)),
            )
            .set((
                generation_attempts::status.eq(status(AttemptStatus::Error)),
                generation_attempts::error_message.eq(reason),
                generation_attempts::updated_at.eq(now),
            ))
            .execute(conn)?;

            diesel::update(generation_runs::table.find(run_id.as_str()))
                .set((
                    generation_runs::error_message.eq(reason),
                    generation_runs::completed_at.eq(run.completed_at.unwrap_or(now)),
                ))
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }

    async fn mark_run_completed(
        &self,
        run_id: &RunId,
        error: Option<&str>,
    ) -> AuditionResult<()> {
        let mut conn = self.conn.lock().await;
        conn.transaction::<_, StoreError, _>(|conn| {
            let run = load_run(conn, run_id)?;
            let completed_at = run.completed_at.unwrap_or_else(Utc::now);
            let error_message = error.map(str::to_string).or(run.error_message);

            diesel::update(generation_runs::table.find(run_id.as_str()))
                .set((
                    generation_runs::completed_at.eq(completed_at),
                    generation_runs::error_message.eq(error_message),
                ))
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }

    async fn record_batch_submission(&self, submission: &BatchSubmission) -> AuditionResult<()> {
        let row = SubmissionRow::try_from(submission)?;
        let mut conn = self.conn.lock().await;
        let inserted = diesel::insert_into(batch_submissions::table)
            .values(&row)
            .on_conflict(batch_submissions::batch_id)
            .do_nothing()
            .execute(&mut *conn)
            .map_err(StoreError::from)?;
        if inserted == 0 {
            debug!(batch_id = %submission.batch_id, "Submission already recorded");
        }
        Ok(())
    }

    async fn list_batch_submissions_since(
        &self,
        since: DateTime<Utc>,
    ) -> AuditionResult<Vec<BatchSubmission>> {
        let mut conn = self.conn.lock().await;
        let rows: Vec<SubmissionRow> = batch_submissions::table
            .filter(batch_submissions::submitted_at.ge(since))
            .order(batch_submissions::submitted_at.asc())
            .select(SubmissionRow::as_select())
            .load(&mut *conn)
            .map_err(StoreError::from)?;
        Ok(rows
            .into_iter()
            .map(BatchSubmission::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
