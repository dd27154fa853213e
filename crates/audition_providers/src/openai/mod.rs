//! OpenAI Batch API over `/v1/chat/completions`.

mod client;
mod dto;

pub use client::OpenAiBatchClient;
pub use dto::{OpenAiChatBody, OpenAiChatBodyBuilder, OpenAiMessage};
