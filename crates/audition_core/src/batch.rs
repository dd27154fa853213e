//! Provider batch jobs, requests, and results.

use crate::{ProviderKind, RunId, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-neutral batch status.
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
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    /// Accepted, not yet processing
    Pending,
    /// Processing
    InProgress,
    /// Finished; results can be retrieved
    Completed,
    /// Rejected or failed as a whole
    Failed,
    /// Cancelled before finishing
    Cancelled,
    /// Hit the provider's completion window
    Expired,
}

impl BatchStatus {
    /// No further state changes will happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Cancelled
                | BatchStatus::Expired
        )
    }

    /// Terminal without usable results.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            BatchStatus::Failed | BatchStatus::Cancelled | BatchStatus::Expired
        )
    }
}

/// Per-batch request tallies as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestCounts {
    /// Requests in the batch
    pub total: u64,
    /// Still processing
    pub processing: u64,
    /// Finished successfully
    pub succeeded: u64,
    /// Finished with an error
    pub errored: u64,
    /// Cancelled
    pub cancelled: u64,
    /// Expired
    pub expired: u64,
}

/// A provider batch as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Provider-assigned batch id
    pub batch_id: String,
    /// Provider that owns the batch
    pub provider: ProviderKind,
    /// Normalized status
    pub status: BatchStatus,
    /// Request tallies
    pub request_counts: RequestCounts,
    /// Where results can be fetched from, once available
    pub results_location: Option<String>,
    /// Where per-request errors can be fetched from, if separate
    pub errors_location: Option<String>,
}

impl BatchJob {
    /// Completed, yet the provider reports it processed nothing.
    pub fn is_empty_completion(&self) -> bool {
        self.status == BatchStatus::Completed
            && self.request_counts.succeeded == 0
            && self.request_counts.errored == 0
    }
}

/// One request inside a batch, already in the provider's body shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Encoded custom id
    pub custom_id: String,
    /// Provider-specific request body
    pub body: serde_json::Value,
}

impl BatchRequest {
    /// Serialized size used for payload cap checks.
    pub fn approx_bytes(&self) -> usize {
        self.custom_id.len() + self.body.to_string().len()
    }
}

/// The outcome the provider reported for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultOutcome {
    /// Generated text decoded cleanly
    Succeeded {
        /// Generated text
        text: String,
        /// Token accounting
        usage: TokenUsage,
    },
    /// Provider reported a per-request failure
    Errored {
        /// Provider's message
        message: String,
    },
    /// Result could not be trusted: bad encoding, mojibake, or empty body.
    /// The attempt is left pending so it can be refetched.
    Invalid {
        /// What was wrong
        reason: String,
    },
}

/// One entry of a batch's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Custom id echoed by the provider
    pub custom_id: String,
    /// What happened
    pub outcome: ResultOutcome,
}

/// Durable record of a successful submission.
///
/// Kept independently of attempts so reconciliation can rediscover batches
/// even when the attempt rows were never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmission {
    /// Provider-assigned batch id
    pub batch_id: String,
    /// Provider that owns the batch
    pub provider: ProviderKind,
    /// Run the batch was submitted for
    pub run_id: RunId,
    /// Requests in the batch
    pub request_count: u32,
    /// When the provider accepted the batch
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_and_in_progress_are_live() {
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::InProgress.is_terminal());
        assert!(BatchStatus::Completed.is_terminal());
        assert!(!BatchStatus::Completed.is_failure());
        assert!(BatchStatus::Expired.is_failure());
    }

    #[test]
    fn empty_completion_detected() {
        let job = BatchJob {
            batch_id: "b1".into(),
            provider: ProviderKind::Anthropic,
            status: BatchStatus::Completed,
            request_counts: RequestCounts {
                total: 3,
                cancelled: 3,
                ..Default::default()
            },
            results_location: None,
            errors_location: None,
        };
        assert!(job.is_empty_completion());
    }
}
