//! OpenAI Batch API data transfer objects.

use derive_builder::Builder;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiMessage {
    /// `system`, `user`, or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

/// `/v1/chat/completions` body for one batched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder, Getters)]
#[builder(setter(into))]
pub struct OpenAiChatBody {
    /// Model identifier
    model: String,
    /// Conversation
    messages: Vec<OpenAiMessage>,
    /// Output token ceiling
    max_tokens: u32,
    /// Sampling temperature
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl OpenAiChatBody {
    /// Creates a new builder.
    pub fn builder() -> OpenAiChatBodyBuilder {
        OpenAiChatBodyBuilder::default()
    }
}

/// One line of the uploaded input file.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct InputLine<'a> {
    pub custom_id: &'a str,
    pub method: &'static str,
    pub url: &'static str,
    pub body: &'a serde_json::Value,
}

/// Uploaded file object.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FileObject {
    pub id: String,
}

/// Batch creation request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateBatch<'a> {
    pub input_file_id: &'a str,
    pub endpoint: &'static str,
    pub completion_window: &'static str,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct OpenAiRequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

/// A batch object.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchObject {
    pub id: String,
    /// `validating`, `failed`, `in_progress`, `finalizing`, `completed`,
    /// `expired`, `cancelling`, or `cancelled`
    pub status: String,
    #[serde(default)]
    pub request_counts: OpenAiRequestCounts,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
}

/// One line of an output or error file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OutputLine {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<OutputResponse>,
    #[serde(default)]
    pub error: Option<OutputError>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OutputResponse {
    pub status_code: u16,
    #[serde(default)]
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OutputError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: ChatUsage,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}
