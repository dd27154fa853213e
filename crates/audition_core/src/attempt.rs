//! Generation attempts and their lifecycle.

use crate::{ProviderKind, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single attempt.
///
/// ```text
/// pending ──submit──▶ batch_pending ──result──▶ completed
///    │                     │
///    └──────failure────────┴──────────────────▶ error
/// ```
///
/// `batch_pending → batch_pending` is allowed so reconciliation can repair a
/// wrong batch id.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptStatus {
    /// Recorded, not yet submitted
    Pending,
    /// Submitted in a provider batch, result outstanding
    BatchPending,
    /// Result recorded
    Completed,
    /// Failed; `error_message` says why
    Error,
}

impl AttemptStatus {
    /// Completed and error are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptStatus::Completed | AttemptStatus::Error)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// # Examples
    ///
    /// ```
    /// use audition_core::AttemptStatus;
    ///
    /// assert!(AttemptStatus::Pending.can_transition_to(AttemptStatus::BatchPending));
    /// assert!(!AttemptStatus::Completed.can_transition_to(AttemptStatus::Error));
    /// ```
    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        use AttemptStatus::*;
        matches!(
            (self, next),
            (Pending, BatchPending)
                | (Pending, Error)
                | (BatchPending, BatchPending)
                | (BatchPending, Completed)
                | (BatchPending, Error)
        )
    }
}

/// Token accounting reported by the provider for one result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Uncached input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Input tokens served from the prompt cache
    pub cache_read_tokens: u64,
    /// Input tokens written to the prompt cache
    pub cache_write_tokens: u64,
}

/// One prompt × replicate within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    /// Store-assigned identifier
    pub id: i64,
    /// Owning run
    pub run_id: RunId,
    /// Condition under test
    pub condition_id: i64,
    /// Prompt sent
    pub prompt_id: i64,
    /// Zero-based replicate index
    pub replicate_index: u32,
    /// Provider the attempt is sent to
    pub provider: ProviderKind,
    /// Encoded custom id echoed back by the provider
    pub custom_id: String,
    /// Current lifecycle state
    pub status: AttemptStatus,
    /// Provider request body, recorded before submission
    pub request_payload: serde_json::Value,
    /// Provider batch carrying this attempt, once submitted
    pub batch_id: Option<String>,
    /// Generated text, once completed
    pub response_text: Option<String>,
    /// Token accounting, once completed
    pub usage: Option<TokenUsage>,
    /// Failure reason, once errored
    pub error_message: Option<String>,
    /// When the attempt was recorded
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// An attempt not yet stored; always starts `pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttempt {
    /// Owning run
    pub run_id: RunId,
    /// Condition under test
    pub condition_id: i64,
    /// Prompt sent
    pub prompt_id: i64,
    /// Zero-based replicate index
    pub replicate_index: u32,
    /// Provider the attempt is sent to
    pub provider: ProviderKind,
    /// Encoded custom id
    pub custom_id: String,
    /// Provider request body
    pub request_payload: serde_json::Value,
}

/// A successful result to record against an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCompletion {
    /// Generated text
    pub response_text: String,
    /// Token accounting
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn terminal_states_cannot_move() {
        for next in [
            AttemptStatus::Pending,
            AttemptStatus::BatchPending,
            AttemptStatus::Completed,
            AttemptStatus::Error,
        ] {
            assert!(!AttemptStatus::Completed.can_transition_to(next));
            assert!(!AttemptStatus::Error.can_transition_to(next));
        }
    }

    #[test]
    fn pending_cannot_complete_without_batch() {
        assert!(!AttemptStatus::Pending.can_transition_to(AttemptStatus::Completed));
    }

    #[test]
    fn status_round_trips_through_snake_case() {
        assert_eq!(AttemptStatus::BatchPending.to_string(), "batch_pending");
        assert_eq!(
            AttemptStatus::from_str("batch_pending").unwrap(),
            AttemptStatus::BatchPending
        );
    }
}
