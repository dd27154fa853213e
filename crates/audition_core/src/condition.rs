//! Experimental conditions.

use crate::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored model configuration under test.
///
/// Conditions are immutable once stored: the same slug and version must
/// always mean the same provider, model, and sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Store-assigned identifier
    pub id: i64,
    /// Human-readable key, unique together with `version`
    pub slug: String,
    /// Version of this slug
    pub version: i32,
    /// Provider that runs this condition
    pub provider: ProviderKind,
    /// Model name as the provider spells it
    pub model: String,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Output token ceiling per request
    pub max_tokens: u32,
    /// Optional system prompt shared by every request
    pub system_prompt: Option<String>,
    /// Mark the shared prefix as cacheable where the provider supports it
    pub prompt_caching: bool,
    /// When the condition was first stored
    pub created_at: DateTime<Utc>,
}

impl Condition {
    /// True when `spec` describes exactly this condition's settings.
    pub fn matches_spec(&self, spec: &ConditionSpec) -> bool {
        self.slug == spec.slug
            && self.version == spec.version
            && self.provider == spec.provider
            && self.model == spec.model
            && self.temperature == spec.temperature
            && self.max_tokens == spec.max_tokens
            && self.system_prompt == spec.system_prompt
            && self.prompt_caching == spec.prompt_caching
    }
}

fn default_version() -> i32 {
    1
}

fn default_max_tokens() -> u32 {
    1024
}

/// The settings needed to store a condition.
///
/// # Examples
///
/// ```
/// use audition_core::{ConditionSpecBuilder, ProviderKind};
///
/// let spec = ConditionSpecBuilder::default()
///     .slug("haiku-cold")
///     .provider(ProviderKind::Anthropic)
///     .model("claude-3-5-haiku-latest")
///     .temperature(Some(0.0))
///     .build()
///     .unwrap();
///
/// assert_eq!(spec.version, 1);
/// assert_eq!(spec.max_tokens, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_builder::Builder)]
#[builder(setter(into))]
pub struct ConditionSpec {
    /// Human-readable key
    pub slug: String,
    /// Version of this slug
    #[serde(default = "default_version")]
    #[builder(default = "1")]
    pub version: i32,
    /// Provider that runs this condition
    pub provider: ProviderKind,
    /// Model name
    pub model: String,
    /// Sampling temperature
    #[serde(default)]
    #[builder(default)]
    pub temperature: Option<f32>,
    /// Output token ceiling per request
    #[serde(default = "default_max_tokens")]
    #[builder(default = "1024")]
    pub max_tokens: u32,
    /// Optional system prompt
    #[serde(default)]
    #[builder(default)]
    pub system_prompt: Option<String>,
    /// Enable provider prompt caching
    #[serde(default)]
    #[builder(default)]
    pub prompt_caching: bool,
}
