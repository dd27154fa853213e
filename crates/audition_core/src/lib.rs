//! Core data types for the Audition batch experiment runner.
//!
//! An audition sends the same prompts to many model configurations
//! ([`Condition`]s) through provider batch APIs. A [`GenerationRun`] is one
//! "condition × prompts × replicates" invocation; each unit of work is a
//! [`GenerationAttempt`] linked to the provider's records only through its
//! [`CustomId`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod attempt;
mod batch;
mod condition;
mod custom_id;
mod prompt;
mod provider;
mod run;
mod tokens;

pub use attempt::{AttemptCompletion, AttemptStatus, GenerationAttempt, NewAttempt, TokenUsage};
pub use batch::{
    BatchJob, BatchRequest, BatchResult, BatchStatus, BatchSubmission, RequestCounts,
    ResultOutcome,
};
pub use condition::{Condition, ConditionSpec, ConditionSpecBuilder};
pub use custom_id::{
    CUSTOM_ID_FORMAT_VERSION, CUSTOM_ID_SEPARATOR, CustomId, CustomIdFormat, MAX_CUSTOM_ID_LEN,
};
pub use prompt::{NewPrompt, Prompt};
pub use provider::ProviderKind;
pub use run::{GenerationRun, NewRun, RunId};
pub use tokens::estimate_tokens;
