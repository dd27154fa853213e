//! Metrics for batch submission, polling, and reconciliation.
//!
//! OpenTelemetry instruments on the `audition_batch` meter, labeled with
//! provider and, where it applies, model and outcome.

use audition_core::ProviderKind;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, Meter},
};
use std::sync::OnceLock;

static METRICS: OnceLock<BatchMetrics> = OnceLock::new();

/// Metrics for the batch lifecycle.
#[derive(Clone)]
pub struct BatchMetrics {
    /// Meter handle kept alive for metric instruments
    _meter: Meter,
    /// Batches accepted by a provider
    pub batches_submitted: Counter<u64>,
    /// Requests inside accepted batches
    pub requests_submitted: Counter<u64>,
    /// Chunks whose submission failed for good
    pub submit_failures: Counter<u64>,
    /// Attempts resolved by polling, labeled by outcome
    pub attempts_resolved: Counter<u64>,
    /// Status or result queries that failed and will be retried
    pub poll_errors: Counter<u64>,
    /// Runs whose batch mapping was repaired
    pub reconcile_corrections: Counter<u64>,
    /// Runs flagged as unrecoverable
    pub reconcile_flags: Counter<u64>,
    /// Time spent waiting at the admission gate, in seconds
    pub rate_limit_wait: Histogram<f64>,
}

impl BatchMetrics {
    fn init() -> Self {
        let meter = global::meter("audition_batch");

        Self {
            _meter: meter.clone(),
            batches_submitted: meter
                .u64_counter("batch.submitted")
                .with_description("Batches accepted by a provider")
                .build(),
            requests_submitted: meter
                .u64_counter("batch.requests")
                .with_description("Requests inside accepted batches")
                .build(),
            submit_failures: meter
                .u64_counter("batch.submit_failures")
                .with_description("Batch submissions that failed after retries")
                .build(),
            attempts_resolved: meter
                .u64_counter("batch.attempts_resolved")
                .with_description("Attempts moved to a terminal state by polling")
                .build(),
            poll_errors: meter
                .u64_counter("batch.poll_errors")
                .with_description("Transient status or result query failures")
                .build(),
            reconcile_corrections: meter
                .u64_counter("batch.reconcile.corrections")
                .with_description("Runs repointed to their true batch")
                .build(),
            reconcile_flags: meter
                .u64_counter("batch.reconcile.flags")
                .with_description("Runs marked as errors for operator review")
                .build(),
            rate_limit_wait: meter
                .f64_histogram("batch.rate_limit_wait")
                .with_unit("seconds")
                .with_description("Time spent waiting for rate limit admission")
                .build(),
        }
    }

    /// Get the global instance.
    pub fn get() -> &'static Self {
        METRICS.get_or_init(Self::init)
    }

    /// Record an accepted batch.
    pub fn record_submission(&self, provider: ProviderKind, model: &str, requests: usize) {
        let labels = &[
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("model", model.to_string()),
        ];
        self.batches_submitted.add(1, labels);
        self.requests_submitted.add(requests as u64, labels);
    }

    /// Record a chunk that could not be submitted.
    pub fn record_submit_failure(&self, provider: ProviderKind, model: &str) {
        self.submit_failures.add(
            1,
            &[
                KeyValue::new("provider", provider.to_string()),
                KeyValue::new("model", model.to_string()),
            ],
        );
    }

    /// Record attempts reaching a terminal state (`completed` or `error`).
    pub fn record_resolved(&self, provider: ProviderKind, outcome: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        self.attempts_resolved.add(
            count as u64,
            &[
                KeyValue::new("provider", provider.to_string()),
                KeyValue::new("outcome", outcome),
            ],
        );
    }

    /// Record a status or result query that will be retried next cycle.
    pub fn record_poll_error(&self, provider: ProviderKind) {
        self.poll_errors
            .add(1, &[KeyValue::new("provider", provider.to_string())]);
    }

    /// Record a repaired run.
    pub fn record_correction(&self) {
        self.reconcile_corrections.add(1, &[]);
    }

    /// Record a run flagged for operator review.
    pub fn record_flag(&self) {
        self.reconcile_flags.add(1, &[]);
    }

    /// Record time spent at the admission gate.
    pub fn record_wait(&self, provider: ProviderKind, model: &str, wait_secs: f64) {
        self.rate_limit_wait.record(
            wait_secs,
            &[
                KeyValue::new("provider", provider.to_string()),
                KeyValue::new("model", model.to_string()),
            ],
        );
    }
}
