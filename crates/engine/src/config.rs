//! Engine-wide configuration, read once from the environment.
//!
//! Provider credentials are read once at construction via
//! `AnthropicConfig::from_env`/`OpenAiConfig::from_env`, never re-read per
//! request.

use crate::error::Result;
use crate::llm::anthropic::AnthropicConfig;
use crate::llm::openai::OpenAiConfig;

/// Aggregates every provider's environment-derived configuration plus the
/// engine's default invocation limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiConfig>,
    pub ollama: OpenAiConfig,
    pub default_max_turns: u32,
    pub default_max_tokens: u32,
}

impl EngineConfig {
    /// Build a config from the environment. Missing provider credentials
    /// are not an error here — only attempting to use that provider without
    /// its key fails, via `EngineError::MissingApiKey`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            anthropic: AnthropicConfig::from_env().ok(),
            openai: OpenAiConfig::openai_from_env().ok(),
            ollama: OpenAiConfig::ollama_from_env(),
            default_max_turns: 10,
            default_max_tokens: 4096,
        })
    }
}
