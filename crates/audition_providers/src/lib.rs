//! Batch API clients for Audition.
//!
//! Two providers are supported, both behind the uniform
//! [`BatchClient`](audition_interface::BatchClient) contract:
//!
//! - **Anthropic** Message Batches: requests are posted inline, results are
//!   streamed back as JSONL from a results URL.
//! - **OpenAI** Batch API: requests are uploaded as a JSONL file, then a
//!   batch is created over that file; results live in output and error files.
//!
//! Both clients enforce their provider's request-count and payload caps
//! before any network call, normalize provider statuses onto
//! [`BatchStatus`](audition_core::BatchStatus), and decode results strictly
//! as UTF-8, flagging mojibake and empty content instead of persisting it.
//!
//! # Example
//!
//! ```no_run
//! use audition_providers::ProviderRegistry;
//! use audition_rate_limit::AuditionConfig;
//! use audition_core::ProviderKind;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuditionConfig::load()?;
//! let registry = ProviderRegistry::from_config(&config)?;
//! if let Some(client) = registry.get(ProviderKind::Anthropic) {
//!     println!("max requests per batch: {}", client.limits().max_requests());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod anthropic;
mod decode;
mod http;
mod metrics;
mod openai;
mod registry;
mod settings;

pub use anthropic::{
    AnthropicBatchClient, AnthropicMessage, AnthropicParams, AnthropicParamsBuilder,
    AnthropicTextBlock, CacheControl,
};
pub use metrics::{ApiMetrics, classify_error};
pub use openai::{OpenAiBatchClient, OpenAiChatBody, OpenAiChatBodyBuilder, OpenAiMessage};
pub use registry::{ProviderRegistry, build_client};
pub use settings::{
    ANTHROPIC_MAX_BYTES, ANTHROPIC_MAX_REQUESTS, OPENAI_MAX_BYTES, OPENAI_MAX_REQUESTS,
    ProviderSettings, ProviderSettingsBuilder,
};
