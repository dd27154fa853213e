use crate::anthropic::dto::{
    AnthropicMessage, AnthropicParams, AnthropicTextBlock, BatchEntry, CreateBatch, MessageBatch,
    ResultBody, ResultLine,
};
use crate::decode::parse_result_stream;
use crate::http::{Pacer, build_client, send, send_bytes, send_json};
use crate::ProviderSettings;
use async_trait::async_trait;
use audition_core::{
    BatchJob, BatchRequest, BatchResult, BatchStatus, Condition, Prompt, ProviderKind,
    RequestCounts, ResultOutcome, TokenUsage,
};
use audition_error::{AuditionResult, ProviderError, ProviderErrorKind};
use audition_interface::{BatchClient, BatchLimits, check_batch_limits};
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info, instrument, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const BATCHES_PATH: &str = "/v1/messages/batches";

/// Anthropic Message Batches client.
#[derive(Debug, Clone)]
pub struct AnthropicBatchClient {
    client: Client,
    settings: ProviderSettings,
    pacer: Pacer,
}

impl AnthropicBatchClient {
    /// Creates a new client.
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        debug!(base_url = %settings.base_url(), "Creating Anthropic batch client");
        Ok(Self {
            client: build_client(*settings.request_timeout())?,
            pacer: Pacer::per_second(*settings.status_queries_per_second()),
            settings,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", self.settings.api_key())
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    /// Map Anthropic's processing status and tallies onto [`BatchStatus`].
    ///
    /// `ended` means every request reached a final state. It counts as
    /// completed when anything was processed, otherwise as cancelled or
    /// expired depending on which tally accounts for the requests.
    pub(crate) fn normalize(batch: &MessageBatch) -> BatchJob {
        let counts = batch.request_counts;
        let status = match batch.processing_status.as_str() {
            "in_progress" | "canceling" => BatchStatus::InProgress,
            "ended" if counts.succeeded + counts.errored > 0 => BatchStatus::Completed,
            "ended" if counts.canceled > 0 => BatchStatus::Cancelled,
            "ended" if counts.expired > 0 => BatchStatus::Expired,
            "ended" => BatchStatus::Completed,
            other => {
                warn!(batch_id = %batch.id, status = other, "Unknown Anthropic processing status");
                BatchStatus::Pending
            }
        };

        BatchJob {
            batch_id: batch.id.clone(),
            provider: ProviderKind::Anthropic,
            status,
            request_counts: RequestCounts {
                total: counts.processing
                    + counts.succeeded
                    + counts.errored
                    + counts.canceled
                    + counts.expired,
                processing: counts.processing,
                succeeded: counts.succeeded,
                errored: counts.errored,
                cancelled: counts.canceled,
                expired: counts.expired,
            },
            results_location: batch.results_url.clone(),
            errors_location: None,
        }
    }

    pub(crate) fn parse_line(line: &str) -> Result<BatchResult, String> {
        let line: ResultLine = serde_json::from_str(line)
            .map_err(|e| format!("unparseable Anthropic result line: {}", e))?;

        let outcome = match line.result {
            ResultBody::Succeeded { message } => {
                let text = message
                    .content
                    .iter()
                    .filter(|block| block.kind == "text")
                    .filter_map(|block| block.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("");
                let usage = message.usage;
                ResultOutcome::Succeeded {
                    text,
                    usage: TokenUsage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
                        cache_write_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
                    },
                }
            }
            ResultBody::Errored { error } => ResultOutcome::Errored {
                message: error.describe(),
            },
            ResultBody::Canceled => ResultOutcome::Errored {
                message: "request canceled before processing".to_string(),
            },
            ResultBody::Expired => ResultOutcome::Errored {
                message: "request expired before processing".to_string(),
            },
        };

        Ok(BatchResult {
            custom_id: line.custom_id,
            outcome,
        })
    }
}

#[async_trait]
impl BatchClient for AnthropicBatchClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
        let cacheable = condition.prompt_caching;
        let params = AnthropicParams::builder()
            .model(condition.model.clone())
            .max_tokens(condition.max_tokens)
            .messages(vec![AnthropicMessage {
                role: "user".to_string(),
                content: vec![AnthropicTextBlock::text(prompt.body.clone(), cacheable)],
            }])
            .system(
                condition
                    .system_prompt
                    .as_ref()
                    .map(|system| vec![AnthropicTextBlock::text(system.clone(), cacheable)]),
            )
            .temperature(condition.temperature)
            .build()
            .map_err(|e| {
                ProviderError::new(ProviderErrorKind::Parse(format!(
                    "Failed to build Anthropic params: {}",
                    e
                )))
            })?;

        let body = serde_json::to_value(&params).map_err(|e| {
            ProviderError::new(ProviderErrorKind::Parse(format!(
                "Failed to serialize Anthropic params: {}",
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
        let bytes = check_batch_limits(requests, self.settings.limits())?;
        debug!(bytes, "Batch admitted");

        let payload = CreateBatch {
            requests: requests
                .iter()
                .map(|request| BatchEntry {
                    custom_id: &request.custom_id,
                    params: &request.body,
                })
                .collect(),
        };

        let batch: MessageBatch = send_json(
            ProviderKind::Anthropic,
            "submit",
            self.authorized(self.client.post(self.settings.url(BATCHES_PATH)))
                .json(&payload),
        )
        .await?;

        info!(batch_id = %batch.id, "Submitted Anthropic batch");
        Ok(batch.id)
    }

    #[instrument(skip(self))]
    async fn get_status(&self, batch_id: &str) -> AuditionResult<BatchJob> {
        self.pacer.ready().await;
        let url = self.settings.url(&format!("{}/{}", BATCHES_PATH, batch_id));
        let batch: MessageBatch = send_json(
            ProviderKind::Anthropic,
            "status",
            self.authorized(self.client.get(url)),
        )
        .await?;

        let job = Self::normalize(&batch);
        debug!(status = %job.status, "Fetched Anthropic batch status");
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

        let url = job.results_location.clone().unwrap_or_else(|| {
            self.settings
                .url(&format!("{}/{}/results", BATCHES_PATH, job.batch_id))
        });

        self.pacer.ready().await;
        let bytes = send_bytes(
            ProviderKind::Anthropic,
            "results",
            self.authorized(self.client.get(url)),
        )
        .await?;

        let results = parse_result_stream(&bytes, &job.batch_id, Self::parse_line);
        debug!(count = results.len(), "Parsed Anthropic results");
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, batch_id: &str) -> AuditionResult<()> {
        let url = self
            .settings
            .url(&format!("{}/{}/cancel", BATCHES_PATH, batch_id));
        send(
            ProviderKind::Anthropic,
            "cancel",
            self.authorized(self.client.post(url)),
        )
        .await?;
        info!("Requested Anthropic batch cancellation");
        Ok(())
    }
}
