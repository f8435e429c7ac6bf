//! SSE stream parser for OpenAI-compatible Chat Completions APIs.
//!
//! The same parser serves OpenAI, Ollama (via its OpenAI-compatible surface),
//! and any other gateway speaking this wire shape, since they all use
//! identical `choices[].delta` framing terminated by `data: [DONE]`.

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::llm::types::{StopReason, TokenUsage, ToolCall};

/// Accumulates fragments from an OpenAI-style SSE stream into a complete
/// response.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    text: String,
    tool_call_builders: Vec<OpenAiToolCallBuilder>,
    done: bool,
    usage: TokenUsage,
    finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct OpenAiToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a single SSE line. Returns `Ok(Some(text_delta))` for incremental
    /// text content, `Ok(None)` otherwise.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let data = match line.strip_prefix("data: ") {
            Some(d) => d,
            None => return Ok(None),
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| EngineError::StreamError {
            reason: format!("invalid JSON in OpenAI-compatible SSE data: {e}"),
        })?;

        let choice = &v["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_owned());
        }

        let delta = &choice["delta"];
        if delta.is_null() {
            self.maybe_capture_usage(&v);
            return Ok(None);
        }

        let mut text_delta: Option<String> = None;
        if let Some(content) = delta["content"].as_str() {
            self.text.push_str(content);
            text_delta = Some(content.to_owned());
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;
                while self.tool_call_builders.len() <= index {
                    self.tool_call_builders
                        .push(OpenAiToolCallBuilder::default());
                }
                let builder = &mut self.tool_call_builders[index];

                if let Some(id) = tc["id"].as_str() {
                    builder.id = id.to_owned();
                }
                let func = &tc["function"];
                if let Some(name) = func["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = func["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        self.maybe_capture_usage(&v);

        Ok(text_delta)
    }

    fn maybe_capture_usage(&mut self, v: &Value) {
        if let Some(usage_obj) = v.get("usage").filter(|u| !u.is_null()) {
            if let Some(input) = usage_obj["prompt_tokens"].as_u64() {
                self.usage.input = input;
            }
            if let Some(output) = usage_obj["completion_tokens"].as_u64() {
                self.usage.output = output;
            }
        }
    }

    /// Consume the accumulator and produce the final tool calls (if any),
    /// text, mapped stop reason, and usage.
    pub fn finish(self) -> Result<(String, Vec<ToolCall>, StopReason, TokenUsage)> {
        let stop_reason = map_finish_reason(self.finish_reason.as_deref(), !self.tool_call_builders.is_empty());

        if self.tool_call_builders.is_empty() {
            return Ok((self.text, Vec::new(), stop_reason, self.usage));
        }

        let calls: Result<Vec<ToolCall>> = self
            .tool_call_builders
            .into_iter()
            .map(|b| {
                let input = if b.arguments.trim().is_empty() {
                    serde_json::Map::new()
                } else {
                    match serde_json::from_str::<serde_json::Map<String, Value>>(&b.arguments) {
                        Ok(m) => m,
                        Err(_) => {
                            let mut m = serde_json::Map::new();
                            m.insert("_error".into(), Value::String("malformed tool arguments".into()));
                            m
                        }
                    }
                };
                Ok(ToolCall {
                    id: b.id,
                    name: b.name,
                    input: input.into_iter().collect(),
                })
            })
            .collect();

        Ok((self.text, calls?, stop_reason, self.usage))
    }
}

pub fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    match reason {
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("stop") => StopReason::EndTurn,
        _ if has_tool_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}
