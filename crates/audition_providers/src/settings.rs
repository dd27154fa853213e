//! Connection settings shared by every batch client.

use audition_core::ProviderKind;
use audition_error::{AuditionResult, ConfigError, ProviderError, ProviderErrorKind};
use audition_interface::BatchLimits;
use audition_rate_limit::ProviderConfig;
use derive_builder::Builder;
use derive_getters::Getters;
use std::time::Duration;

/// Anthropic Message Batches caps.
pub const ANTHROPIC_MAX_REQUESTS: usize = 100_000;
/// Anthropic Message Batches payload cap (256 MB).
pub const ANTHROPIC_MAX_BYTES: usize = 256 * 1024 * 1024;
/// OpenAI Batch API request cap.
pub const OPENAI_MAX_REQUESTS: usize = 50_000;
/// OpenAI Batch API input file cap (200 MB).
pub const OPENAI_MAX_BYTES: usize = 200 * 1024 * 1024;

/// How to reach one provider.
///
/// # Examples
///
/// ```
/// use audition_interface::BatchLimits;
/// use audition_providers::ProviderSettingsBuilder;
///
/// let settings = ProviderSettingsBuilder::default()
///     .api_key("sk-test")
///     .base_url("http://localhost:8080")
///     .limits(BatchLimits::new(10, 1024))
///     .build()
///     .unwrap();
/// assert_eq!(*settings.status_queries_per_second(), 5);
/// ```
#[derive(Debug, Clone, Builder, Getters)]
#[builder(setter(into))]
pub struct ProviderSettings {
    /// API key
    api_key: String,
    /// API root without trailing slash
    base_url: String,
    /// Batch caps
    limits: BatchLimits,
    /// Per-call network timeout
    #[builder(default = "Duration::from_secs(120)")]
    request_timeout: Duration,
    /// Pace for status and result queries; zero disables pacing
    #[builder(default = "5")]
    status_queries_per_second: u32,
}

impl ProviderSettings {
    /// Resolve settings for `kind` from its configuration section, reading
    /// the API key from the configured environment variable.
    pub fn from_config(kind: ProviderKind, config: &ProviderConfig) -> AuditionResult<Self> {
        let (default_url, default_env, default_limits) = match kind {
            ProviderKind::Anthropic => (
                "https://api.anthropic.com",
                "ANTHROPIC_API_KEY",
                BatchLimits::new(ANTHROPIC_MAX_REQUESTS, ANTHROPIC_MAX_BYTES),
            ),
            ProviderKind::OpenAi => (
                "https://api.openai.com",
                "OPENAI_API_KEY",
                BatchLimits::new(OPENAI_MAX_REQUESTS, OPENAI_MAX_BYTES),
            ),
        };

        let key_env = config.api_key_env.as_deref().unwrap_or(default_env);
        let api_key = std::env::var(key_env)
            .map_err(|_| ProviderError::new(ProviderErrorKind::MissingApiKey(key_env.to_string())))?;

        let limits = BatchLimits::new(
            config
                .max_requests_per_batch
                .unwrap_or(*default_limits.max_requests()),
            config.max_batch_bytes.unwrap_or(*default_limits.max_bytes()),
        );

        ProviderSettingsBuilder::default()
            .api_key(api_key)
            .base_url(
                config
                    .base_url
                    .as_deref()
                    .unwrap_or(default_url)
                    .trim_end_matches('/'),
            )
            .limits(limits)
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
            .status_queries_per_second(config.status_queries_per_second)
            .build()
            .map_err(|e| ConfigError::new(format!("Invalid {} settings: {}", kind, e)).into())
    }

    /// Join a path onto the API root.
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
