//! Scripted batch client for testing.

use async_trait::async_trait;
use audition_core::{
    BatchJob, BatchRequest, BatchResult, BatchStatus, Condition, Prompt, ProviderKind,
    RequestCounts, ResultOutcome, TokenUsage,
};
use audition_error::{AuditionResult, ProviderError, ProviderErrorKind};
use audition_interface::{BatchClient, BatchLimits, check_batch_limits};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct MockState {
    next_batch: usize,
    submit_failures: VecDeque<ProviderErrorKind>,
    submit_calls: usize,
    submitted: Vec<(String, Vec<BatchRequest>)>,
    statuses: HashMap<String, BatchStatus>,
    results: HashMap<String, Vec<BatchResult>>,
    status_failures: HashSet<String>,
    cancelled: Vec<String>,
    gate: Option<SubmitGate>,
}

/// Holds accepted submissions before `submit` returns.
#[derive(Debug, Clone, Default)]
pub struct SubmitGate {
    /// Signalled once a batch has been accepted
    pub accepted: Arc<Notify>,
    /// Lets the held `submit` return
    pub release: Arc<Notify>,
}

/// Mock batch client.
///
/// Batches are accepted as `mock_batch_<n>` in `pending` status. Tests move
/// them along with [`MockBatchClient::set_status`] and script their results.
#[derive(Clone)]
pub struct MockBatchClient {
    provider: ProviderKind,
    limits: BatchLimits,
    state: Arc<Mutex<MockState>>,
}

#[allow(dead_code)]
impl MockBatchClient {
    /// Mock with generous limits.
    pub fn new(provider: ProviderKind) -> Self {
        Self::with_limits(provider, 100, 10_000_000)
    }

    /// Mock with explicit batch caps.
    pub fn with_limits(provider: ProviderKind, max_requests: usize, max_bytes: usize) -> Self {
        Self {
            provider,
            limits: BatchLimits::new(max_requests, max_bytes),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Fail the next `times` submissions with `kind`.
    pub fn fail_next_submits(&self, kind: ProviderErrorKind, times: usize) {
        let mut state = self.state.lock().unwrap();
        state
            .submit_failures
            .extend(std::iter::repeat_n(kind, times));
    }

    /// Hold every accepted submission until the gate is released.
    pub fn hold_submits(&self) -> SubmitGate {
        let gate = SubmitGate::default();
        self.state.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    /// Register a batch the client never submitted itself.
    pub fn add_batch(&self, batch_id: &str, status: BatchStatus, results: Vec<BatchResult>) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(batch_id.to_string(), status);
        state.results.insert(batch_id.to_string(), results);
    }

    /// Move a batch to `status`.
    pub fn set_status(&self, batch_id: &str, status: BatchStatus) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(batch_id.to_string(), status);
    }

    /// Replace a batch's results.
    pub fn set_results(&self, batch_id: &str, results: Vec<BatchResult>) {
        let mut state = self.state.lock().unwrap();
        state.results.insert(batch_id.to_string(), results);
    }

    /// Make status queries for `batch_id` fail with a 503.
    pub fn fail_status(&self, batch_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.status_failures.insert(batch_id.to_string());
    }

    /// Let status queries for `batch_id` succeed again.
    pub fn heal_status(&self, batch_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.status_failures.remove(batch_id);
    }

    /// Complete a submitted batch, answering every request with `text`.
    pub fn complete_echo(&self, batch_id: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        let custom_ids: Vec<String> = state
            .submitted
            .iter()
            .filter(|(id, _)| id == batch_id)
            .flat_map(|(_, requests)| requests.iter().map(|r| r.custom_id.clone()))
            .collect();
        let results = custom_ids
            .into_iter()
            .map(|custom_id| succeeded(&custom_id, text))
            .collect();
        state.results.insert(batch_id.to_string(), results);
        state.statuses.insert(batch_id.to_string(), BatchStatus::Completed);
    }

    /// Batches accepted so far, in order.
    pub fn submitted(&self) -> Vec<(String, Vec<BatchRequest>)> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Calls to `submit`, accepted or not.
    pub fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }

    /// Batches cancel was called for.
    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

/// A successful result line.
pub fn succeeded(custom_id: &str, text: &str) -> BatchResult {
    BatchResult {
        custom_id: custom_id.to_string(),
        outcome: ResultOutcome::Succeeded {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 12,
                output_tokens: 34,
                ..TokenUsage::default()
            },
        },
    }
}

#[async_trait]
impl BatchClient for MockBatchClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn limits(&self) -> BatchLimits {
        self.limits
    }

    fn build_request(
        &self,
        condition: &Condition,
        prompt: &Prompt,
        custom_id: &str,
    ) -> AuditionResult<BatchRequest> {
        Ok(BatchRequest {
            custom_id: custom_id.to_string(),
            body: json!({
                "model": condition.model,
                "max_tokens": condition.max_tokens,
                "prompt": prompt.body,
            }),
        })
    }

    async fn submit(&self, requests: &[BatchRequest]) -> AuditionResult<String> {
        check_batch_limits(requests, &self.limits)?;
        let (batch_id, gate) = {
            let mut state = self.state.lock().unwrap();
            state.submit_calls += 1;
            if let Some(kind) = state.submit_failures.pop_front() {
                return Err(ProviderError::new(kind).into());
            }
            state.next_batch += 1;
            let batch_id = format!("mock_batch_{}", state.next_batch);
            state.submitted.push((batch_id.clone(), requests.to_vec()));
            state.statuses.insert(batch_id.clone(), BatchStatus::Pending);
            (batch_id, state.gate.clone())
        };
        if let Some(gate) = gate {
            gate.accepted.notify_one();
            gate.release.notified().await;
        }
        Ok(batch_id)
    }

    async fn get_status(&self, batch_id: &str) -> AuditionResult<BatchJob> {
        let state = self.state.lock().unwrap();
        if state.status_failures.contains(batch_id) {
            return Err(ProviderError::new(ProviderErrorKind::Http {
                status_code: 503,
                message: "overloaded".to_string(),
            })
            .into());
        }
        let Some(status) = state.statuses.get(batch_id).copied() else {
            return Err(ProviderError::new(ProviderErrorKind::Http {
                status_code: 404,
                message: format!("batch {} not found", batch_id),
            })
            .into());
        };
        let total = state.results.get(batch_id).map_or(0, Vec::len) as u64;
        Ok(BatchJob {
            batch_id: batch_id.to_string(),
            provider: self.provider,
            status,
            request_counts: RequestCounts {
                total,
                ..RequestCounts::default()
            },
            results_location: None,
            errors_location: None,
        })
    }

    async fn retrieve_results(&self, job: &BatchJob) -> AuditionResult<Vec<BatchResult>> {
        if job.status != BatchStatus::Completed {
            return Err(ProviderError::new(ProviderErrorKind::ResultsUnavailable {
                batch_id: job.batch_id.clone(),
                status: job.status.to_string(),
            })
            .into());
        }
        let state = self.state.lock().unwrap();
        Ok(state.results.get(&job.batch_id).cloned().unwrap_or_default())
    }

    async fn cancel(&self, batch_id: &str) -> AuditionResult<()> {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(batch_id.to_string());
        state
            .statuses
            .insert(batch_id.to_string(), BatchStatus::Cancelled);
        Ok(())
    }
}
