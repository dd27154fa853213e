//! Anthropic Message Batches data transfer objects.

use derive_builder::Builder;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};

/// Prompt-cache marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    /// Always `ephemeral`
    #[serde(rename = "type")]
    pub kind: String,
}

impl CacheControl {
    /// The provider's only cache type.
    pub fn ephemeral() -> Self {
        Self {
            kind: "ephemeral".to_string(),
        }
    }
}

/// A text content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnthropicTextBlock {
    /// Always `text`
    #[serde(rename = "type")]
    pub kind: String,
    /// Block text
    pub text: String,
    /// Cache marker, when prompt caching is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl AnthropicTextBlock {
    /// A text block, optionally cacheable.
    pub fn text(text: impl Into<String>, cacheable: bool) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            cache_control: cacheable.then(CacheControl::ephemeral),
        }
    }
}

/// A conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// `user` or `assistant`
    pub role: String,
    /// Content blocks
    pub content: Vec<AnthropicTextBlock>,
}

/// Messages API parameters for one batched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder, Getters)]
#[builder(setter(into))]
pub struct AnthropicParams {
    /// Model identifier
    model: String,
    /// Output token ceiling
    max_tokens: u32,
    /// Conversation
    messages: Vec<AnthropicMessage>,
    /// System prompt blocks
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system: Option<Vec<AnthropicTextBlock>>,
    /// Sampling temperature
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl AnthropicParams {
    /// Creates a new builder.
    pub fn builder() -> AnthropicParamsBuilder {
        AnthropicParamsBuilder::default()
    }
}

/// One entry of a batch creation request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct BatchEntry<'a> {
    pub custom_id: &'a str,
    pub params: &'a serde_json::Value,
}

/// Batch creation request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateBatch<'a> {
    pub requests: Vec<BatchEntry<'a>>,
}

/// Request tallies as Anthropic reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct AnthropicRequestCounts {
    #[serde(default)]
    pub processing: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub errored: u64,
    #[serde(default)]
    pub canceled: u64,
    #[serde(default)]
    pub expired: u64,
}

/// A message batch object.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageBatch {
    pub id: String,
    /// `in_progress`, `canceling`, or `ended`
    pub processing_status: String,
    #[serde(default)]
    pub request_counts: AnthropicRequestCounts,
    #[serde(default)]
    pub results_url: Option<String>,
}

/// One line of a batch results stream.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResultLine {
    pub custom_id: String,
    pub result: ResultBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ResultBody {
    Succeeded { message: ResultMessage },
    Errored { error: ErrorEnvelope },
    Canceled,
    Expired,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResultMessage {
    #[serde(default)]
    pub content: Vec<ResultContent>,
    #[serde(default)]
    pub usage: ResultUsage,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResultContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct ResultUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

/// Errors arrive wrapped: `{"type": "error", "error": {"type": ..., "message": ...}}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorEnvelope {
    pub(crate) fn describe(&self) -> String {
        match &self.error {
            Some(detail) => format!(
                "{}: {}",
                detail.kind.as_deref().unwrap_or("error"),
                detail.message.as_deref().unwrap_or("no message")
            ),
            None => self
                .message
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        }
    }
}
