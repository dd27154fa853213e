//! Configuration structures.
//!
//! Audition reads one layered TOML configuration:
//! - Bundled defaults (include_str! from audition.toml)
//! - User overrides (~/.config/audition/audition.toml, then ./audition.toml)
//!
//! Later sources override earlier ones key by key.

use crate::RateLimits;
use audition_error::{AuditionError, AuditionResult, ConfigError};
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Model-specific rate limit overrides.
///
/// ```toml
/// [providers.openai.tiers.tier1.models."gpt-4o"]
/// tpm = 90_000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct ModelTierConfig {
    /// Requests per minute (overrides tier default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,

    /// Tokens per minute (overrides tier default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tpm: Option<u64>,
}

/// Limits for one provider tier.
///
/// `None` means "fall back to `[rate_limit.default]`".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct TierConfig {
    /// Display name of the tier
    #[serde(default)]
    pub name: String,

    /// Requests per minute (tier-level default)
    #[serde(default)]
    pub rpm: Option<u32>,

    /// Tokens per minute (tier-level default)
    #[serde(default)]
    pub tpm: Option<u64>,

    /// Model-specific overrides
    #[serde(default)]
    pub models: HashMap<String, ModelTierConfig>,
}

impl TierConfig {
    /// Model-specific overrides, matched case-insensitively.
    pub fn model_override(&self, model_name: &str) -> Option<&ModelTierConfig> {
        self.models
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(model_name))
            .map(|(_, config)| config)
    }

    /// This tier with `model_name`'s overrides applied.
    pub fn for_model(&self, model_name: &str) -> TierConfig {
        match self.model_override(model_name) {
            Some(model_config) => TierConfig {
                name: self.name.clone(),
                rpm: model_config.rpm.or(self.rpm),
                tpm: model_config.tpm.or(self.tpm),
                models: HashMap::new(),
            },
            None => self.clone(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_status_queries_per_second() -> u32 {
    5
}

/// Configuration for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct ProviderConfig {
    /// Tier used when none is named
    #[serde(default)]
    pub default_tier: String,

    /// Provider enforces its own gateway-side limits; unlisted models are
    /// submitted unthrottled.
    #[serde(default)]
    pub self_managed: bool,

    /// API root, e.g. `https://api.anthropic.com`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Requests per batch cap
    #[serde(default)]
    pub max_requests_per_batch: Option<usize>,

    /// Serialized batch size cap in bytes
    #[serde(default)]
    pub max_batch_bytes: Option<usize>,

    /// Per-call network timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Pace for status and result queries
    #[serde(default = "default_status_queries_per_second")]
    pub status_queries_per_second: u32,

    /// Tier name to tier limits
    #[serde(default)]
    pub tiers: HashMap<String, TierConfig>,
}

impl ProviderConfig {
    /// Look up a tier case-insensitively; `None` selects `default_tier`.
    pub fn tier(&self, tier_name: Option<&str>) -> Option<&TierConfig> {
        let wanted = tier_name.unwrap_or(&self.default_tier);
        self.tiers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, tier)| tier)
    }
}

/// Fallback limits for unlisted provider/model combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DefaultLimits {
    /// Requests per minute
    pub rpm: u32,
    /// Tokens per minute
    pub tpm: u64,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            rpm: 10,
            tpm: 20_000,
        }
    }
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct RateLimitSection {
    /// Conservative fallback limits
    #[serde(default)]
    pub default: DefaultLimits,
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Submission retries for transient provider errors
    pub max_submit_retries: usize,
    /// Base backoff between submission retries
    pub retry_backoff_ms: u64,
    /// Delay between poll cycles in watch mode
    pub poll_interval_secs: u64,
    /// Concurrent status queries per poll cycle
    pub status_concurrency: usize,
    /// Provider prompt-cache lifetime the planner keeps replicate groups within
    pub cache_ttl_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_submit_retries: 3,
            retry_backoff_ms: 1_000,
            poll_interval_secs: 60,
            status_concurrency: 8,
            cache_ttl_secs: 300,
        }
    }
}

/// `[reconciler]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Age after which a `pending` or `batch_pending` attempt counts as stuck
    pub staleness_secs: u64,
    /// How far back submissions are scanned for candidate batches
    pub lookback_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 3_600,
            lookback_secs: 172_800,
        }
    }
}

/// Admission policy for one provider/model combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Enforce these limits locally
    Throttled(RateLimits),
    /// Provider limits itself; submit without local throttling
    SelfManaged,
}

/// Top-level Audition configuration.
///
/// # Example
///
/// ```no_run
/// use audition_rate_limit::{Admission, AuditionConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AuditionConfig::load()?;
/// match config.limits_for("anthropic", "claude-3-5-haiku-latest") {
///     Admission::Throttled(limits) => println!("{} rpm", limits.requests_per_minute),
///     Admission::SelfManaged => println!("unthrottled"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct AuditionConfig {
    /// Provider name to provider configuration
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Fallback limits
    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// Submission and polling settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Reconciliation settings
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl AuditionConfig {
    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> AuditionResult<Self> {
        debug!("Loading configuration from file");

        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| {
                AuditionError::from(ConfigError::new(format!(
                    "Failed to read configuration from {}: {}",
                    path.as_ref().display(),
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                AuditionError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }

    /// Load configuration with precedence: current dir > home dir > bundled.
    ///
    /// User config files are optional and silently skipped if absent.
    #[instrument]
    pub fn load() -> AuditionResult<Self> {
        debug!("Loading configuration with precedence: current dir > home dir > bundled defaults");

        const DEFAULT_CONFIG: &str = include_str!("../../../audition.toml");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/audition/audition.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        builder = builder.add_source(File::with_name("audition").required(false));

        builder
            .build()
            .map_err(|e| {
                AuditionError::from(ConfigError::new(format!(
                    "Failed to build configuration: {}",
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                AuditionError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }

    /// Provider configuration, matched case-insensitively.
    pub fn provider(&self, provider: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(provider))
            .map(|(_, config)| config)
    }

    /// Tier configuration for a provider; `None` selects its default tier.
    #[instrument(skip(self))]
    pub fn get_tier(&self, provider: &str, tier_name: Option<&str>) -> Option<TierConfig> {
        let tier = self.provider(provider)?.tier(tier_name)?;
        debug!(provider, tier = %tier.name, "Resolved tier configuration");
        Some(tier.clone())
    }

    /// Admission policy for a provider/model combination.
    ///
    /// An explicit model override always throttles. Otherwise a provider
    /// flagged `self_managed` is left unthrottled, a listed provider uses its
    /// default tier, and anything else falls back to `[rate_limit.default]`.
    #[instrument(skip(self))]
    pub fn limits_for(&self, provider: &str, model: &str) -> Admission {
        let fallback = self.rate_limit.default;
        let Some(provider_config) = self.provider(provider) else {
            debug!("Provider not configured, using default limits");
            return Admission::Throttled(RateLimits::from_default(&fallback));
        };
        let tier = provider_config.tier(None);

        if let Some(tier) = tier.filter(|tier| tier.model_override(model).is_some()) {
            return Admission::Throttled(RateLimits::from_tier(&tier.for_model(model), &fallback));
        }
        if provider_config.self_managed {
            debug!("Provider self-manages rate limits");
            return Admission::SelfManaged;
        }
        match tier {
            Some(tier) => Admission::Throttled(RateLimits::from_tier(tier, &fallback)),
            None => Admission::Throttled(RateLimits::from_default(&fallback)),
        }
    }
}
