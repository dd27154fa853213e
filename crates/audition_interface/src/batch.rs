//! The provider batch capability set.

use async_trait::async_trait;
use audition_core::{BatchJob, BatchRequest, BatchResult, Condition, Prompt, ProviderKind};
use audition_error::{AdmissionError, AdmissionErrorKind, AuditionResult};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};

/// Provider-documented caps on a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct BatchLimits {
    /// Maximum requests per batch
    max_requests: usize,
    /// Maximum serialized batch size in bytes
    max_bytes: usize,
}

impl BatchLimits {
    /// Create limits.
    pub fn new(max_requests: usize, max_bytes: usize) -> Self {
        Self {
            max_requests,
            max_bytes,
        }
    }
}

/// Admission check shared by every client, run before any network call.
///
/// Returns the total serialized size on success. Batches are never
/// truncated to fit: the caller must split and resubmit.
///
/// # Examples
///
/// ```
/// use audition_core::BatchRequest;
/// use audition_interface::{BatchLimits, check_batch_limits};
///
/// let limits = BatchLimits::new(2, 1024);
/// let request = BatchRequest { custom_id: "r_1_0".into(), body: serde_json::json!({}) };
///
/// assert!(check_batch_limits(&[request.clone(), request.clone()], &limits).is_ok());
/// assert!(check_batch_limits(&[request.clone(), request.clone(), request], &limits).is_err());
/// ```
pub fn check_batch_limits(
    requests: &[BatchRequest],
    limits: &BatchLimits,
) -> Result<usize, AdmissionError> {
    if requests.is_empty() {
        return Err(AdmissionError::new(AdmissionErrorKind::EmptyBatch));
    }
    if requests.len() > limits.max_requests {
        return Err(AdmissionError::new(AdmissionErrorKind::TooManyRequests {
            count: requests.len(),
            max: limits.max_requests,
        }));
    }
    let bytes: usize = requests.iter().map(BatchRequest::approx_bytes).sum();
    if bytes > limits.max_bytes {
        return Err(AdmissionError::new(AdmissionErrorKind::PayloadTooLarge {
            bytes,
            max: limits.max_bytes,
        }));
    }
    Ok(bytes)
}

/// Uniform contract over a provider's asynchronous batch API.
///
/// Implementations translate provider-specific request, status, and result
/// shapes to and from the types in `audition_core`. Every network call must
/// be timeout-bounded.
#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Provider this client talks to.
    fn provider(&self) -> ProviderKind;

    /// Caps enforced by [`check_batch_limits`] before submission.
    fn limits(&self) -> BatchLimits;

    /// Build the provider-native request body for one attempt.
    fn build_request(
        &self,
        condition: &Condition,
        prompt: &Prompt,
        custom_id: &str,
    ) -> AuditionResult<BatchRequest>;

    /// Submit a batch and return the provider-assigned batch id.
    ///
    /// Fails with an admission error, without touching the network, when the
    /// batch exceeds [`BatchClient::limits`].
    async fn submit(&self, requests: &[BatchRequest]) -> AuditionResult<String>;

    /// Query a batch and normalize its status.
    async fn get_status(&self, batch_id: &str) -> AuditionResult<BatchJob>;

    /// Download and decode every result of a completed batch.
    ///
    /// Fails with `ResultsUnavailable` unless the job is completed.
    async fn retrieve_results(&self, job: &BatchJob) -> AuditionResult<Vec<BatchResult>>;

    /// Ask the provider to cancel a batch. Best effort.
    async fn cancel(&self, batch_id: &str) -> AuditionResult<()>;
}
