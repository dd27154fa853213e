//! Metrics for provider batch API calls.
//!
//! OpenTelemetry instruments labeled by provider and operation
//! (`submit`, `upload`, `status`, `results`, `cancel`).

use audition_core::ProviderKind;
use audition_error::{ProviderError, ProviderErrorKind};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, Meter},
};
use std::sync::OnceLock;

static METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Metrics for provider control-plane calls.
#[derive(Clone)]
pub struct ApiMetrics {
    /// Meter handle kept alive for metric instruments
    _meter: Meter,
    /// Successful API calls
    pub calls: Counter<u64>,
    /// Failed API calls
    pub errors: Counter<u64>,
    /// API call duration in seconds
    pub duration: Histogram<f64>,
}

impl ApiMetrics {
    fn init() -> Self {
        let meter = global::meter("audition_provider");

        Self {
            _meter: meter.clone(),
            calls: meter
                .u64_counter("provider.calls")
                .with_description("Successful provider batch API calls")
                .build(),
            errors: meter
                .u64_counter("provider.errors")
                .with_description("Failed provider batch API calls")
                .build(),
            duration: meter
                .f64_histogram("provider.duration")
                .with_unit("seconds")
                .with_description("Provider batch API call duration")
                .build(),
        }
    }

    /// Get the global instance.
    pub fn get() -> &'static Self {
        METRICS.get_or_init(Self::init)
    }

    /// Record a successful call.
    pub fn record_call(&self, provider: ProviderKind, operation: &str, duration_secs: f64) {
        let labels = &[
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("operation", operation.to_string()),
        ];
        self.calls.add(1, labels);
        self.duration.record(duration_secs, labels);
    }

    /// Record a failed call.
    pub fn record_error(&self, provider: ProviderKind, operation: &str, error: &ProviderError) {
        let labels = &[
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("error_type", classify_error(&error.kind)),
        ];
        self.errors.add(1, labels);
    }
}

/// Classify a provider error for metrics labeling.
///
/// Returns one of: "rate_limit", "auth", "server", "client", "network",
/// "timeout", "parse", "other".
pub fn classify_error(kind: &ProviderErrorKind) -> &'static str {
    match kind {
        ProviderErrorKind::Http { status_code, .. } => match *status_code {
            429 => "rate_limit",
            401 | 403 => "auth",
            500..=599 => "server",
            _ => "client",
        },
        ProviderErrorKind::Transport(_) => "network",
        ProviderErrorKind::Timeout(_) => "timeout",
        ProviderErrorKind::Parse(_) | ProviderErrorKind::Decoding { .. } => "parse",
        _ => "other",
    }
}
