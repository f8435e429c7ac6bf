//! Provider selection and the common [`LlmClient`] contract.

use async_trait::async_trait;
use std::pin::Pin;

use crate::error::Result;
use crate::llm::types::{ChatRequest, ChatResponse, StreamEvent};

/// Which backend a model string resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Ollama,
}

/// A boxed stream of [`StreamEvent`]s for a single in-flight chat request.
pub type EventStream = Pin<Box<dyn futures::Stream<Item = StreamEvent> + Send>>;

/// The common contract every provider backend implements.
///
/// Both methods honour cancellation transparently: callers wrap the future
/// in `tokio::select!` against a `CancellationToken` or `tokio::time::timeout`
/// — this trait has no cancellation-specific parameter of its own.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Fully buffered call.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streaming call. The returned stream's final item is always
    /// `StreamEvent::Done` or `StreamEvent::Error`.
    async fn chat_stream(&self, request: ChatRequest) -> Result<EventStream>;
}

/// Resolve `(provider, bare_model_name)` from a model string:
///
/// 1. An explicit `provider/model` prefix wins outright.
/// 2. Otherwise a name-prefix heuristic: `claude*` → Anthropic, `gpt-*`/`o1*`/
///    `o3*`/`o4*` → OpenAI.
/// 3. Otherwise fall back to the environment: `OLLAMA_HOST` set → Ollama,
///    else `OPENAI_API_KEY` set → OpenAI, else Anthropic.
pub fn parse_model_string(model: &str) -> (Provider, String) {
    if let Some((prefix, rest)) = model.split_once('/') {
        match prefix.to_ascii_lowercase().as_str() {
            "anthropic" => return (Provider::Anthropic, rest.to_owned()),
            "openai" => return (Provider::OpenAi, rest.to_owned()),
            "ollama" => return (Provider::Ollama, rest.to_owned()),
            _ => {
                // Not a recognised provider prefix; fall through and treat
                // the whole string as a bare model name.
            }
        }
    }

    let lower = model.to_ascii_lowercase();
    if lower.starts_with("claude") {
        return (Provider::Anthropic, model.to_owned());
    }
    if lower.starts_with("gpt-")
        || lower.starts_with("o1")
        || lower.starts_with("o3")
        || lower.starts_with("o4")
    {
        return (Provider::OpenAi, model.to_owned());
    }

    if std::env::var("OLLAMA_HOST").is_ok() {
        (Provider::Ollama, model.to_owned())
    } else if std::env::var("OPENAI_API_KEY").is_ok() {
        (Provider::OpenAi, model.to_owned())
    } else {
        (Provider::Anthropic, model.to_owned())
    }
}
