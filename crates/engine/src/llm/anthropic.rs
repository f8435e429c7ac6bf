//! Anthropic Messages API transport: request body construction,
//! system-message splitting, and SSE stream consumption, all in terms of
//! this crate's provider-agnostic [`ChatRequest`]/[`ChatResponse`] types.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::llm::provider::{EventStream, LlmClient};
use crate::llm::streaming::{SseDelta, SseEvent, SseParser};
use crate::llm::types::{
    ChatRequest, ChatResponse, Message, Role, StopReason, StreamEvent, TokenUsage, ToolCall,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for [`AnthropicClient`].
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| EngineError::MissingApiKey {
            provider: "anthropic".into(),
        })?;
        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
        })
    }
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client builds with static config");
        Self { http, config }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            reqwest::header::HeaderValue::from_str(&self.config.api_key)
                .expect("api key is valid header value"),
        );
        headers.insert(
            "anthropic-version",
            reqwest::header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(anthropic_message_json)
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });

        if let Some(system) = &request.system {
            body["system"] = json!(system);
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
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    }))
                    .collect::<Vec<_>>()
            );
        }
        body
    }

    async fn send(&self, body: Value) -> Result<reqwest::Response> {
        let model = body.get("model").and_then(|m| m.as_str()).unwrap_or("unknown").to_string();
        debug!(provider = "anthropic", model = %model, "sending chat request");
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.config.base_url))
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Provider {
                reason: format!("request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let err = parse_error_envelope(status, &text);
            warn!(provider = "anthropic", status = %status, "chat request failed");
            return Err(err);
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&request, false);
        let resp = self.send(body).await?;
        let value: Value = resp.json().await.map_err(|e| {
            warn!(provider = "anthropic", error = %e, "failed to parse response body");
            EngineError::ProviderParseFailed {
                reason: e.to_string(),
            }
        })?;
        let parsed = parse_non_streaming_response(&value)?;
        debug!(provider = "anthropic", tokens = parsed.usage.total(), "chat request completed");
        Ok(parsed)
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<EventStream> {
        debug!(provider = "anthropic", "opening chat stream");
        let body = self.build_body(&request, true);
        let resp = self.send(body).await?;
        let mut byte_stream = resp.bytes_stream();

        // Drive the SSE parse loop on a background task and hand events back
        // over a channel, turned into a `Stream` the caller can poll lazily.
        // This keeps the parsing state machine out of `poll_next` entirely.
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut accumulator = StreamAccumulator::default();
            let mut buf = Vec::new();

            loop {
                let chunk = match byte_stream.next().await {
                    Some(Ok(c)) => c,
                    Some(Err(e)) => {
                        warn!(provider = "anthropic", error = %e, "stream read failed");
                        let _ = tx.send(StreamEvent::Error(format!("stream read failed: {e}")));
                        return;
                    }
                    None => return,
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes);

                    match parser.parse_line(line.trim_end()) {
                        Ok(Some(event)) => {
                            if let Some(out) = accumulator.ingest(event) {
                                let _ = tx.send(out);
                            }
                            if accumulator.is_done() {
                                let _ = tx.send(StreamEvent::Done(accumulator.finish()));
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(StreamEvent::Error(e.to_string()));
                            return;
                        }
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

fn anthropic_message_json(message: &Message) -> Value {
    match message.role {
        Role::System => json!({ "role": "user", "content": message.content }),
        Role::User => {
            if let Some(result) = &message.tool_result {
                json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": result.tool_use_id,
                        "content": result.content,
                        "is_error": result.is_error,
                    }],
                })
            } else {
                json!({ "role": "user", "content": message.content.clone().unwrap_or_default() })
            }
        }
        Role::Assistant => {
            let mut blocks: Vec<Value> = Vec::new();
            if let Some(text) = &message.content {
                if !text.is_empty() {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
            }
            for call in &message.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.input,
                }));
            }
            json!({ "role": "assistant", "content": blocks })
        }
    }
}

fn parse_non_streaming_response(value: &Value) -> Result<ChatResponse> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = value["content"].as_array() {
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    text.push_str(block["text"].as_str().unwrap_or_default());
                }
                Some("tool_use") => {
                    let input = block["input"]
                        .as_object()
                        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                        .unwrap_or_default();
                    tool_calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_owned(),
                        name: block["name"].as_str().unwrap_or_default().to_owned(),
                        input,
                    });
                }
                _ => {}
            }
        }
    }

    let stop_reason = map_stop_reason(value["stop_reason"].as_str());
    let usage = TokenUsage {
        input: value["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output: value["usage"]["output_tokens"].as_u64().unwrap_or(0),
        cache_read: value["usage"]["cache_read_input_tokens"].as_u64().unwrap_or(0),
        cache_write: value["usage"]["cache_creation_input_tokens"]
            .as_u64()
            .unwrap_or(0),
    };

    Ok(ChatResponse {
        text,
        tool_calls,
        stop_reason,
        usage,
    })
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn parse_error_envelope(status: reqwest::StatusCode, body: &str) -> EngineError {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        let error_type = v["error"]["type"].as_str();
        let message = v["error"]["message"].as_str();
        if let (Some(t), Some(m)) = (error_type, message) {
            return EngineError::Provider {
                reason: format!("HTTP {}: {}: {}", status.as_u16(), t, m),
            };
        }
    }
    EngineError::Provider {
        reason: format!("HTTP {}", status.as_u16()),
    }
}

/// Accumulates Anthropic SSE events into a final [`ChatResponse`], and
/// surfaces individual text/tool-call deltas as they arrive.
#[derive(Default)]
struct StreamAccumulator {
    text: String,
    blocks: Vec<ToolCallBuilder>,
    stop_reason: Option<String>,
    usage: TokenUsage,
    done: bool,
}

#[derive(Default)]
struct ToolCallBuilder {
    index: u32,
    id: String,
    name: String,
    partial_json: String,
    is_tool: bool,
}

impl StreamAccumulator {
    /// Fold one parsed SSE event into accumulator state, returning a public
    /// `StreamEvent` when this one is worth surfacing to the caller
    /// immediately (text and tool-call-start deltas).
    fn ingest(&mut self, event: SseEvent) -> Option<StreamEvent> {
        match event {
            SseEvent::MessageStart { .. } | SseEvent::Ping => None,

            SseEvent::ContentBlockStart {
                index,
                content_type,
                id,
                name,
            } => {
                while self.blocks.len() <= index as usize {
                    self.blocks.push(ToolCallBuilder::default());
                }
                let is_tool = content_type == "tool_use";
                let builder = &mut self.blocks[index as usize];
                builder.index = index;
                builder.is_tool = is_tool;
                if is_tool {
                    builder.id = id.unwrap_or_default();
                    builder.name = name.unwrap_or_default();
                    return Some(StreamEvent::ToolCallStart(ToolCall {
                        id: builder.id.clone(),
                        name: builder.name.clone(),
                        input: Default::default(),
                    }));
                }
                None
            }

            SseEvent::ContentBlockDelta { index, delta } => match delta {
                SseDelta::TextDelta(text) => {
                    self.text.push_str(&text);
                    Some(StreamEvent::Text(text))
                }
                SseDelta::InputJsonDelta(fragment) => {
                    if let Some(builder) = self.blocks.get_mut(index as usize) {
                        builder.partial_json.push_str(&fragment);
                    }
                    None
                }
            },

            SseEvent::ContentBlockStop { .. } => None,

            SseEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                if let Some((input, output)) = usage {
                    self.usage.input = input;
                    self.usage.output = output;
                }
                None
            }

            SseEvent::MessageStop => {
                self.done = true;
                None
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn finish(self) -> ChatResponse {
        let stop_reason = map_stop_reason(self.stop_reason.as_deref());
        let tool_calls = self
            .blocks
            .into_iter()
            .filter(|b| b.is_tool)
            .map(|b| {
                let input: serde_json::Map<String, Value> = if b.partial_json.trim().is_empty() {
                    serde_json::Map::new()
                } else {
                    serde_json::from_str(&b.partial_json).unwrap_or_default()
                };
                ToolCall {
                    id: b.id,
                    name: b.name,
                    input: input.into_iter().collect(),
                }
            })
            .collect();

        ChatResponse {
            text: self.text,
            tool_calls,
            stop_reason,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_body_includes_system_and_tools() {
        let config = AnthropicConfig {
            api_key: "sk-test".into(),
            base_url: DEFAULT_BASE_URL.into(),
        };
        let client = AnthropicClient::new(config);
        let request = ChatRequest {
            model: "claude-3-opus".into(),
            messages: vec![Message::user("hi")],
            system: Some("be terse".into()),
            tools: vec![],
            max_tokens: 100,
            temperature: Some(0.2),
        };
        let body = client.build_body(&request, false);
        assert_eq!(body["model"], "claude-3-opus");
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn parse_non_streaming_extracts_tool_use() {
        let value = json!({
            "content": [
                { "type": "text", "text": "looking it up" },
                { "type": "tool_use", "id": "call_1", "name": "search", "input": {"q": "rust"} }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        });
        let response = parse_non_streaming_response(&value).unwrap();
        assert_eq!(response.text, "looking it up");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.usage.total(), 15);
    }

    #[test]
    fn error_envelope_parses_vendor_error_shape() {
        let err = parse_error_envelope(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#,
        );
        match err {
            EngineError::Provider { reason } => {
                assert!(reason.contains("429"));
                assert!(reason.contains("rate_limit_error"));
                assert!(reason.contains("slow down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_envelope_falls_back_without_body() {
        let err = parse_error_envelope(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "not json");
        match err {
            EngineError::Provider { reason } => assert_eq!(reason, "HTTP 500"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
