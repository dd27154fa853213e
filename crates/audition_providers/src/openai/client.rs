use crate::decode::parse_result_stream;
use crate::http::{Pacer, build_client, send, send_bytes, send_json};
use crate::openai::dto::{
    BatchObject, ChatCompletion, CreateBatch, FileObject, InputLine, OpenAiChatBody,
    OpenAiMessage, OutputLine,
};
use crate::ProviderSettings;
use async_trait::async_trait;
use audition_core::{
    BatchJob, BatchRequest, BatchResult, BatchStatus, Condition, Prompt, ProviderKind,
    RequestCounts, ResultOutcome, TokenUsage,
};
use audition_error::{AuditionResult, ProviderError, ProviderErrorKind};
use audition_interface::{BatchClient, BatchLimits, check_batch_limits};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info, instrument, warn};

const CHAT_ENDPOINT: &str = "/v1/chat/completions";
const COMPLETION_WINDOW: &str = "24h";

/// OpenAI Batch API client.
///
/// Submission is two calls: upload the requests as a JSONL file, then create
/// a batch over that file.
#[derive(Debug, Clone)]
pub struct OpenAiBatchClient {
    client: Client,
    settings: ProviderSettings,
    pacer: Pacer,
}

impl OpenAiBatchClient {
    /// Creates a new client.
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        debug!(base_url = %settings.base_url(), "Creating OpenAI batch client");
        Ok(Self {
            client: build_client(*settings.request_timeout())?,
            pacer: Pacer::per_second(*settings.status_queries_per_second()),
            settings,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.settings.api_key())
    }

    pub(crate) fn normalize(batch: &BatchObject) -> BatchJob {
        let status = match batch.status.as_str() {
            "validating" => BatchStatus::Pending,
            "in_progress" | "finalizing" | "cancelling" => BatchStatus::InProgress,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            "expired" => BatchStatus::Expired,
            "cancelled" => BatchStatus::Cancelled,
            other => {
                warn!(batch_id = %batch.id, status = other, "Unknown OpenAI batch status");
                BatchStatus::Pending
            }
        };

        let counts = batch.request_counts;
        BatchJob {
            batch_id: batch.id.clone(),
            provider: ProviderKind::OpenAi,
            status,
            request_counts: RequestCounts {
                total: counts.total,
                processing: counts
                    .total
                    .saturating_sub(counts.completed + counts.failed),
                succeeded: counts.completed,
                errored: counts.failed,
                cancelled: 0,
                expired: 0,
            },
            results_location: batch.output_file_id.clone(),
            errors_location: batch.error_file_id.clone(),
        }
    }

    pub(crate) fn parse_line(line: &str) -> Result<BatchResult, String> {
        let line: OutputLine = serde_json::from_str(line)
            .map_err(|e| format!("unparseable OpenAI result line: {}", e))?;

        let outcome = match (line.error, line.response) {
            (Some(error), _) => ResultOutcome::Errored {
                message: format!(
                    "{}: {}",
                    error.code.as_deref().unwrap_or("error"),
                    error.message.as_deref().unwrap_or("no message")
                ),
            },
            (None, Some(response)) if (200..300).contains(&response.status_code) => {
                let completion: ChatCompletion = serde_json::from_value(response.body)
                    .map_err(|e| format!("unparseable chat completion: {}", e))?;
                let text = completion
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .unwrap_or_default();
                let usage = completion.usage;
                let cached = usage
                    .prompt_tokens_details
                    .map(|details| details.cached_tokens)
                    .unwrap_or(0);
                ResultOutcome::Succeeded {
                    text,
                    usage: TokenUsage {
                        input_tokens: usage.prompt_tokens.saturating_sub(cached),
                        output_tokens: usage.completion_tokens,
                        cache_read_tokens: cached,
                        cache_write_tokens: 0,
                    },
                }
            }
            (None, Some(response)) => ResultOutcome::Errored {
                message: response
                    .body
                    .pointer("/error/message")
                    .and_then(|message| message.as_str())
                    .map(|message| format!("HTTP {}: {}", response.status_code, message))
                    .unwrap_or_else(|| format!("HTTP {}", response.status_code)),
            },
            (None, None) => return Err("result line has neither response nor error".to_string()),
        };

        Ok(BatchResult {
            custom_id: line.custom_id,
            outcome,
        })
    }

    fn encode_input(requests: &[BatchRequest]) -> Result<Vec<u8>, ProviderError> {
        let mut jsonl = Vec::new();
        for request in requests {
            let line = InputLine {
                custom_id: &request.custom_id,
                method: "POST",
                url: CHAT_ENDPOINT,
                body: &request.body,
            };
            serde_json::to_writer(&mut jsonl, &line).map_err(|e| {
                ProviderError::new(ProviderErrorKind::Parse(format!(
                    "Failed to encode batch input: {}",
                    e
                )))
            })?;
            jsonl.push(b'\n');
        }
        Ok(jsonl)
    }

    async fn upload(&self, jsonl: Vec<u8>) -> Result<String, ProviderError> {
        let file = Part::bytes(jsonl)
            .file_name("batch.jsonl")
            .mime_str("application/jsonl")
            .map_err(|e| {
                ProviderError::new(ProviderErrorKind::Parse(format!(
                    "Invalid upload content type: {}",
                    e
                )))
            })?;
        let form = Form::new().text("purpose", "batch").part("file", file);

        let uploaded: FileObject = send_json(
            ProviderKind::OpenAi,
            "upload",
            self.authorized(self.client.post(self.settings.url("/v1/files")))
                .multipart(form),
        )
        .await?;
        debug!(file_id = %uploaded.id, "Uploaded batch input file");
        Ok(uploaded.id)
    }

    async fn file_content(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        self.pacer.ready().await;
        let url = self.settings.url(&format!("/v1/files/{}/content", file_id));
        send_bytes(
            ProviderKind::OpenAi,
            "results",
            self.authorized(self.client.get(url)),
        )
        .await
    }
}

#[async_trait]
impl BatchClient for OpenAiBatchClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn limits(&self) -> BatchLimits {
        *self.settings.limits()
    }

    fn build_request(
        &self,
        condition: &Condition,
        prompt: &Prompt,
        custom_id: &str,
    ) -> AuditionResult<BatchRequest> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &condition.system_prompt {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(OpenAiMessage {
            role: "user".to_string(),
            content: prompt.body.clone(),
        });

        // OpenAI caches shared prefixes automatically; no marker needed
        let body = OpenAiChatBody::builder()
            .model(condition.model.clone())
            .messages(messages)
            .max_tokens(condition.max_tokens)
            .temperature(condition.temperature)
            .build()
            .map_err(|e| {
                ProviderError::new(ProviderErrorKind::Parse(format!(
                    "Failed to build OpenAI body: {}",
                    e
                )))
            })?;

        let body = serde_json::to_value(&body).map_err(|e| {
            ProviderError::new(ProviderErrorKind::Parse(format!(
                "Failed to serialize OpenAI body: {}",
                e
            )))
        })?;

        Ok(BatchRequest {
            custom_id: custom_id.to_string(),
            body,
        })
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    async fn submit(&self, requests: &[BatchRequest]) -> AuditionResult<String> {
        check_batch_limits(requests, self.settings.limits())?;

        let jsonl = Self::encode_input(requests)?;
        let input_file_id = self.upload(jsonl).await?;

        let batch: BatchObject = send_json(
            ProviderKind::OpenAi,
            "submit",
            self.authorized(self.client.post(self.settings.url("/v1/batches")))
                .json(&CreateBatch {
                    input_file_id: &input_file_id,
                    endpoint: CHAT_ENDPOINT,
                    completion_window: COMPLETION_WINDOW,
                }),
        )
        .await?;

        info!(batch_id = %batch.id, input_file_id = %input_file_id, "Submitted OpenAI batch");
        Ok(batch.id)
    }

    #[instrument(skip(self))]
    async fn get_status(&self, batch_id: &str) -> AuditionResult<BatchJob> {
        self.pacer.ready().await;
        let url = self.settings.url(&format!("/v1/batches/{}", batch_id));
        let batch: BatchObject = send_json(
            ProviderKind::OpenAi,
            "status",
            self.authorized(self.client.get(url)),
        )
        .await?;

        let job = Self::normalize(&batch);
        debug!(status = %job.status, "Fetched OpenAI batch status");
        Ok(job)
    }

    #[instrument(skip(self, job), fields(batch_id = %job.batch_id))]
    async fn retrieve_results(&self, job: &BatchJob) -> AuditionResult<Vec<BatchResult>> {
        if job.status != BatchStatus::Completed {
            return Err(ProviderError::new(ProviderErrorKind::ResultsUnavailable {
                batch_id: job.batch_id.clone(),
                status: job.status.to_string(),
            })
            .into());
        }

        let mut results = Vec::new();
        for file_id in [&job.results_location, &job.errors_location]
            .into_iter()
            .flatten()
        {
            let bytes = self.file_content(file_id).await?;
            results.extend(parse_result_stream(
                &bytes,
                &job.batch_id,
                Self::parse_line,
            ));
        }

        debug!(count = results.len(), "Parsed OpenAI results");
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, batch_id: &str) -> AuditionResult<()> {
        let url = self.settings.url(&format!("/v1/batches/{}/cancel", batch_id));
        send(
            ProviderKind::OpenAi,
            "cancel",
            self.authorized(self.client.post(url)),
        )
        .await?;
        info!("Requested OpenAI batch cancellation");
        Ok(())
    }
}
