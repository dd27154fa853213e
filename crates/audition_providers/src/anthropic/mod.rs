//! Anthropic Message Batches API.

mod client;
mod dto;

pub use client::AnthropicBatchClient;
pub use dto::{
    AnthropicMessage, AnthropicParams, AnthropicParamsBuilder, AnthropicTextBlock, CacheControl,
};
