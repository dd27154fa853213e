//! Diesel rows and their conversions to domain types.

use crate::schema::{
    batch_submissions, conditions, generation_attempts, generation_runs, prompts,
};
use audition_core::{
    AttemptStatus, BatchSubmission, Condition, ConditionSpec, CustomIdFormat, GenerationAttempt,
    GenerationRun, NewAttempt, NewRun, Prompt, ProviderKind, RunId, TokenUsage,
};
use audition_error::{StoreError, StoreErrorKind};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::str::FromStr;

fn parse_column<T: FromStr>(column: &str, value: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    T::from_str(value).map_err(|e| {
        StoreError::new(StoreErrorKind::Serialization(format!(
            "Bad {} value '{}': {}",
            column, value, e
        )))
    })
}

fn to_u32(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| {
        StoreError::new(StoreErrorKind::Serialization(format!(
            "Negative {}: {}",
            column, value
        )))
    })
}

fn to_i32(column: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| {
        StoreError::new(StoreErrorKind::Serialization(format!(
            "{} out of range: {}",
            column, value
        )))
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

/// Row of the `conditions` table.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = conditions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ConditionRow {
    pub id: i64,
    pub slug: String,
    pub version: i32,
    pub provider: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: i32,
    pub system_prompt: Option<String>,
    pub prompt_caching: bool,
    pub created_at: DateTime<Utc>,
}

/// Insertable and updatable condition fields.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = conditions)]
#[diesel(treat_none_as_null = true)]
pub struct NewConditionRow {
    pub slug: String,
    pub version: i32,
    pub provider: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: i32,
    pub system_prompt: Option<String>,
    pub prompt_caching: bool,
}

impl TryFrom<&ConditionSpec> for NewConditionRow {
    type Error = StoreError;

    fn try_from(spec: &ConditionSpec) -> Result<Self, Self::Error> {
        Ok(Self {
            slug: spec.slug.clone(),
            version: spec.version,
            provider: spec.provider.to_string(),
            model: spec.model.clone(),
            temperature: spec.temperature,
            max_tokens: to_i32("max_tokens", spec.max_tokens)?,
            system_prompt: spec.system_prompt.clone(),
            prompt_caching: spec.prompt_caching,
        })
    }
}

impl TryFrom<ConditionRow> for Condition {
    type Error = StoreError;

    fn try_from(row: ConditionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            provider: parse_column::<ProviderKind>("provider", &row.provider)?,
            max_tokens: to_u32("max_tokens", row.max_tokens)?,
            slug: row.slug,
            version: row.version,
            model: row.model,
            temperature: row.temperature,
            system_prompt: row.system_prompt,
            prompt_caching: row.prompt_caching,
            created_at: row.created_at,
        })
    }
}

/// Row of the `prompts` table.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = prompts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PromptRow {
    pub id: i64,
    pub content_hash: String,
    pub label: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = prompts)]
pub struct NewPromptRow<'a> {
    pub content_hash: String,
    pub label: Option<&'a str>,
    pub body: &'a str,
}

impl From<PromptRow> for Prompt {
    fn from(row: PromptRow) -> Self {
        Self {
            id: row.id,
            content_hash: row.content_hash,
            label: row.label,
            body: row.body,
            created_at: row.created_at,
        }
    }
}

/// Row of the `generation_runs` table.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = generation_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RunRow {
    pub id: String,
    pub condition_id: i64,
    pub replicate_count: i32,
    pub id_format: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = generation_runs)]
pub struct NewRunRow {
    pub id: String,
    pub condition_id: i64,
    pub replicate_count: i32,
    pub id_format: String,
}

impl TryFrom<&NewRun> for NewRunRow {
    type Error = StoreError;

    fn try_from(run: &NewRun) -> Result<Self, Self::Error> {
        Ok(Self {
            id: run.id.to_string(),
            condition_id: run.condition_id,
            replicate_count: to_i32("replicate_count", run.replicate_count)?,
            id_format: run.id_format.to_string(),
        })
    }
}

impl TryFrom<RunRow> for GenerationRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: RunId::new(row.id),
            condition_id: row.condition_id,
            replicate_count: to_u32("replicate_count", row.replicate_count)?,
            id_format: parse_column::<CustomIdFormat>("id_format", &row.id_format)?,
            created_at: row.created_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}

/// Row of the `generation_attempts` table.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = generation_attempts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AttemptRow {
    pub id: i64,
    pub run_id: String,
    pub condition_id: i64,
    pub prompt_id: i64,
    pub replicate_index: i32,
    pub provider: String,
    pub custom_id: String,
    pub status: String,
    pub request_payload: serde_json::Value,
    pub batch_id: Option<String>,
    pub response_text: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cache_read_tokens: Option<i64>,
    pub cache_write_tokens: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = generation_attempts)]
pub struct NewAttemptRow<'a> {
    pub run_id: &'a str,
    pub condition_id: i64,
    pub prompt_id: i64,
    pub replicate_index: i32,
    pub provider: String,
    pub custom_id: &'a str,
    pub status: &'static str,
    pub request_payload: &'a serde_json::Value,
}

impl<'a> TryFrom<&'a NewAttempt> for NewAttemptRow<'a> {
    type Error = StoreError;

    fn try_from(attempt: &'a NewAttempt) -> Result<Self, Self::Error> {
        Ok(Self {
            run_id: attempt.run_id.as_str(),
            condition_id: attempt.condition_id,
            prompt_id: attempt.prompt_id,
            replicate_index: to_i32("replicate_index", attempt.replicate_index)?,
            provider: attempt.provider.to_string(),
            custom_id: &attempt.custom_id,
            status: AttemptStatus::Pending.into(),
            request_payload: &attempt.request_payload,
        })
    }
}

/// Columns written when an attempt completes.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = generation_attempts)]
pub struct AttemptCompletionRow<'a> {
    pub status: &'static str,
    pub response_text: &'a str,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub updated_at: DateTime<Utc>,
}

impl<'a> AttemptCompletionRow<'a> {
    pub fn new(response_text: &'a str, usage: &TokenUsage) -> Self {
        Self {
            status: AttemptStatus::Completed.into(),
            response_text,
            input_tokens: to_i64(usage.input_tokens),
            output_tokens: to_i64(usage.output_tokens),
            cache_read_tokens: to_i64(usage.cache_read_tokens),
            cache_write_tokens: to_i64(usage.cache_write_tokens),
            updated_at: Utc::now(),
        }
    }
}

impl TryFrom<AttemptRow> for GenerationAttempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let usage = row.input_tokens.map(|_| TokenUsage {
            input_tokens: to_u64(row.input_tokens),
            output_tokens: to_u64(row.output_tokens),
            cache_read_tokens: to_u64(row.cache_read_tokens),
            cache_write_tokens: to_u64(row.cache_write_tokens),
        });
        Ok(Self {
            id: row.id,
            run_id: RunId::new(row.run_id),
            condition_id: row.condition_id,
            prompt_id: row.prompt_id,
            replicate_index: to_u32("replicate_index", row.replicate_index)?,
            provider: parse_column::<ProviderKind>("provider", &row.provider)?,
            custom_id: row.custom_id,
            status: parse_column::<AttemptStatus>("status", &row.status)?,
            request_payload: row.request_payload,
            batch_id: row.batch_id,
            response_text: row.response_text,
            usage,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row of the `batch_submissions` table.
#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = batch_submissions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubmissionRow {
    pub batch_id: String,
    pub provider: String,
    pub run_id: String,
    pub request_count: i32,
    pub submitted_at: DateTime<Utc>,
}

impl TryFrom<&BatchSubmission> for SubmissionRow {
    type Error = StoreError;

    fn try_from(submission: &BatchSubmission) -> Result<Self, Self::Error> {
        Ok(Self {
            batch_id: submission.batch_id.clone(),
            provider: submission.provider.to_string(),
            run_id: submission.run_id.to_string(),
            request_count: to_i32("request_count", submission.request_count)?,
            submitted_at: submission.submitted_at,
        })
    }
}

impl TryFrom<SubmissionRow> for BatchSubmission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            provider: parse_column::<ProviderKind>("provider", &row.provider)?,
            request_count: to_u32("request_count", row.request_count)?,
            batch_id: row.batch_id,
            run_id: RunId::new(row.run_id),
            submitted_at: row.submitted_at,
        })
    }
}
