//! LLM integration layer.
//!
//! Organized into:
//!
//! - [`types`] -- provider-agnostic data types (messages, tool calls, streaming events).
//! - [`provider`] -- the `LlmClient` trait and model-string → backend selection.
//! - [`anthropic`] -- Anthropic Messages API transport.
//! - [`openai`] -- OpenAI-compatible transport (also serves Ollama).
//! - [`streaming`] -- SSE parsing for the Anthropic wire format.
//! - [`streaming_openai`] -- SSE parsing for the OpenAI-compatible wire format.

pub mod anthropic;
pub mod openai;
pub mod provider;
pub mod streaming;
pub mod streaming_openai;
pub mod types;

pub use provider::{EventStream, LlmClient, Provider, parse_model_string};
pub use types::{
    ChatRequest, ChatResponse, Message, Role, StopReason, StreamEvent, TokenUsage, ToolCall,
    ToolDefinition, ToolResult,
};

use std::sync::Arc;

use crate::error::Result;
use anthropic::{AnthropicClient, AnthropicConfig};
use openai::{OpenAiCompatibleClient, OpenAiConfig};

/// Build an [`LlmClient`] for `model`, resolving provider and credentials
/// from environment variables per [`parse_model_string`].
pub fn client_for_model(model: &str) -> Result<Arc<dyn LlmClient>> {
    let (provider, _) = parse_model_string(model);
    match provider {
        Provider::Anthropic => {
            let config = AnthropicConfig::from_env()?;
            Ok(Arc::new(AnthropicClient::new(config)))
        }
        Provider::OpenAi => {
            let config = OpenAiConfig::openai_from_env()?;
            Ok(Arc::new(OpenAiCompatibleClient::new(config)))
        }
        Provider::Ollama => {
            let config = OpenAiConfig::ollama_from_env();
            Ok(Arc::new(OpenAiCompatibleClient::new(config)))
        }
    }
}
