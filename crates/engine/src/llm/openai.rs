//! OpenAI-compatible Chat Completions transport.
//!
//! Serves both genuine OpenAI and any OpenAI-compatible gateway, including
//! Ollama — Ollama is dispatched through this same client with no
//! `Authorization` header, since it needs no key.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::llm::provider::{EventStream, LlmClient};
use crate::llm::streaming_openai::{OpenAiStreamAccumulator, map_finish_reason};
use crate::llm::types::{ChatRequest, ChatResponse, Message, Role, StopReason, StreamEvent, TokenUsage, ToolCall};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";

/// Configuration for [`OpenAiCompatibleClient`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// `None` for backends that need no key (Ollama).
    pub api_key: Option<String>,
    pub base_url: String,
}

impl OpenAiConfig {
    pub fn openai_from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| EngineError::MissingApiKey {
            provider: "openai".into(),
        })?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_BASE_URL.to_owned());
        Ok(Self {
            api_key: Some(api_key),
            base_url,
        })
    }

    pub fn ollama_from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| OLLAMA_DEFAULT_HOST.to_owned());
        Self {
            api_key: None,
            base_url: format!("{}/v1", host.trim_end_matches('/')),
        }
    }
}

/// A single client implementation serving every OpenAI-compatible backend.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: OpenAiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client builds with static config");
        Self { http, config }
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().map(openai_message_json));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });

        if request.max_tokens > 0 {
            body["max_tokens"] = json!(request.max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(
                request
                    .tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    }))
                    .collect::<Vec<_>>()
            );
        }
        body
    }

    async fn send(&self, body: Value) -> Result<reqwest::Response> {
        let model = body.get("model").and_then(|m| m.as_str()).unwrap_or("unknown").to_string();
        debug!(provider = "openai", model = %model, base_url = %self.config.base_url, "sending chat request");
        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&body);

        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| EngineError::Provider {
            reason: format!("request failed: {e}"),
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let err = parse_error_envelope(status, &text);
            warn!(provider = "openai", status = %status, "chat request failed");
            return Err(err);
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&request, false);
        let resp = self.send(body).await?;
        let value: Value = resp.json().await.map_err(|e| {
            warn!(provider = "openai", error = %e, "failed to parse response body");
            EngineError::ProviderParseFailed {
                reason: e.to_string(),
            }
        })?;
        let parsed = parse_non_streaming_response(&value)?;
        debug!(provider = "openai", tokens = parsed.usage.total(), "chat request completed");
        Ok(parsed)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<EventStream> {
        debug!(provider = "openai", "opening chat stream");
        let body = self.build_body(&request, true);
        let resp = self.send(body).await?;
        let mut byte_stream = resp.bytes_stream();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut accumulator = OpenAiStreamAccumulator::new();
            let mut buf = Vec::new();

            loop {
                let chunk = match byte_stream.next().await {
                    Some(Ok(c)) => c,
                    Some(Err(e)) => {
                        warn!(provider = "openai", error = %e, "stream read failed");
                        let _ = tx.send(StreamEvent::Error(format!("stream read failed: {e}")));
                        return;
                    }
                    None => return,
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes);

                    match accumulator.feed_line(line.trim_end()) {
                        Ok(Some(text)) => {
                            let _ = tx.send(StreamEvent::Text(text));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(StreamEvent::Error(e.to_string()));
                            return;
                        }
                    }

                    if accumulator.is_done() {
                        match accumulator.finish() {
                            Ok((text, tool_calls, stop_reason, usage)) => {
                                let _ = tx.send(StreamEvent::Done(ChatResponse {
                                    text,
                                    tool_calls,
                                    stop_reason,
                                    usage,
                                }));
                            }
                            Err(e) => {
                                let _ = tx.send(StreamEvent::Error(e.to_string()));
                            }
                        }
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }
}

fn openai_message_json(message: &Message) -> Value {
    match message.role {
        Role::System => json!({ "role": "system", "content": message.content }),
        Role::User => {
            if let Some(result) = &message.tool_result {
                json!({
                    "role": "tool",
                    "tool_call_id": result.tool_use_id,
                    "content": result.content,
                })
            } else {
                json!({ "role": "user", "content": message.content.clone().unwrap_or_default() })
            }
        }
        Role::Assistant => {
            if message.tool_calls.is_empty() {
                json!({ "role": "assistant", "content": message.content.clone().unwrap_or_default() })
            } else {
                let tool_calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": serde_json::to_string(&c.input).unwrap_or_default(),
                            },
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": message.content,
                    "tool_calls": tool_calls,
                })
            }
        }
    }
}

fn parse_non_streaming_response(value: &Value) -> Result<ChatResponse> {
    let choice = &value["choices"][0];
    let message = &choice["message"];
    let text = message["content"].as_str().unwrap_or_default().to_owned();
    let finish_reason = choice["finish_reason"].as_str();

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| {
                    let func = &tc["function"];
                    let args_str = func["arguments"].as_str().unwrap_or("{}");
                    let input: serde_json::Map<String, Value> =
                        serde_json::from_str(args_str).unwrap_or_else(|_| {
                            let mut m = serde_json::Map::new();
                            m.insert(
                                "_error".into(),
                                Value::String("malformed tool arguments".into()),
                            );
                            m
                        });
                    ToolCall {
                        id: tc["id"].as_str().unwrap_or_default().to_owned(),
                        name: func["name"].as_str().unwrap_or_default().to_owned(),
                        input: input.into_iter().collect(),
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let stop_reason = map_finish_reason(finish_reason, !tool_calls.is_empty());

    let usage = TokenUsage {
        input: value["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output: value["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        cache_read: 0,
        cache_write: 0,
    };

    Ok(ChatResponse {
        text,
        tool_calls,
        stop_reason,
        usage,
    })
}

fn parse_error_envelope(status: reqwest::StatusCode, body: &str) -> EngineError {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(message) = v["error"]["message"].as_str() {
            let error_type = v["error"]["type"].as_str().unwrap_or("error");
            return EngineError::Provider {
                reason: format!("HTTP {}: {}: {}", status.as_u16(), error_type, message),
            };
        }
    }
    EngineError::Provider {
        reason: format!("HTTP {}", status.as_u16()),
    }
}
