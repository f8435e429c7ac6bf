//! SSE stream parser for the Anthropic Messages API.
//!
//! The Anthropic streaming format sends `event:` and `data:` lines in
//! standard SSE format. This module parses those lines into typed
//! [`SseEvent`] values; [`crate::llm::anthropic`] folds them into the
//! crate's public [`crate::llm::types::StreamEvent`] and [`crate::llm::types::ChatResponse`].

use serde_json::Value;

use crate::error::{EngineError, Result};

/// A raw Anthropic SSE event, one level below the engine's public
/// `StreamEvent` — this still exposes per-content-block indices and delta
/// framing needed to assemble tool-call arguments incrementally.
#[derive(Debug, Clone)]
pub enum SseEvent {
    MessageStart { message_id: String, model: String },
    ContentBlockStart {
        index: u32,
        content_type: String,
        id: Option<String>,
        name: Option<String>,
    },
    ContentBlockDelta { index: u32, delta: SseDelta },
    ContentBlockStop { index: u32 },
    MessageDelta {
        stop_reason: Option<String>,
        usage: Option<(u64, u64)>,
    },
    MessageStop,
    Ping,
}

#[derive(Debug, Clone)]
pub enum SseDelta {
    TextDelta(String),
    InputJsonDelta(String),
}

/// Parses raw SSE lines from the Anthropic Messages API stream.
///
/// Accumulates partial state across calls because SSE events span multiple
/// lines (`event:` followed by `data:`).
#[derive(Debug, Default)]
pub struct SseParser {
    current_event_type: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line from the SSE stream.
    ///
    /// Returns `Some(event)` when a complete event has been parsed, `None`
    /// for comment lines, blank lines, or the `event:` prefix line (which
    /// just sets internal state for the next `data:` line).
    pub fn parse_line(&mut self, line: &str) -> Result<Option<SseEvent>> {
        let line = line.trim_end();

        if line.starts_with(':') || line.is_empty() {
            return Ok(None);
        }

        if let Some(event_type) = line.strip_prefix("event: ") {
            self.current_event_type = Some(event_type.to_owned());
            return Ok(None);
        }

        if let Some(data) = line.strip_prefix("data: ") {
            let event_type = self
                .current_event_type
                .take()
                .unwrap_or_else(|| "unknown".into());
            return self.parse_event(&event_type, data);
        }

        tracing::trace!(line, "ignoring unrecognised SSE line");
        Ok(None)
    }

    fn parse_event(&self, event_type: &str, data: &str) -> Result<Option<SseEvent>> {
        match event_type {
            "message_start" => {
                let v: Value = parse_json(data)?;
                let message = &v["message"];
                Ok(Some(SseEvent::MessageStart {
                    message_id: json_string(message, "id"),
                    model: json_string(message, "model"),
                }))
            }

            "content_block_start" => {
                let v: Value = parse_json(data)?;
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let block = &v["content_block"];
                let content_type = json_string(block, "type");
                let id = block["id"].as_str().map(String::from);
                let name = block["name"].as_str().map(String::from);

                Ok(Some(SseEvent::ContentBlockStart {
                    index,
                    content_type,
                    id,
                    name,
                }))
            }

            "content_block_delta" => {
                let v: Value = parse_json(data)?;
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let delta_obj = &v["delta"];
                let delta_type = json_string(delta_obj, "type");

                let delta = match delta_type.as_str() {
                    "text_delta" => SseDelta::TextDelta(json_string(delta_obj, "text")),
                    "input_json_delta" => {
                        SseDelta::InputJsonDelta(json_string(delta_obj, "partial_json"))
                    }
                    other => {
                        tracing::warn!(delta_type = other, "unknown delta type");
                        return Ok(None);
                    }
                };

                Ok(Some(SseEvent::ContentBlockDelta { index, delta }))
            }

            "content_block_stop" => {
                let v: Value = parse_json(data)?;
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                Ok(Some(SseEvent::ContentBlockStop { index }))
            }

            "message_delta" => {
                let v: Value = parse_json(data)?;
                let stop_reason = v["delta"]["stop_reason"].as_str().map(String::from);
                let usage = v.get("usage").map(|u| {
                    (
                        u["input_tokens"].as_u64().unwrap_or(0),
                        u["output_tokens"].as_u64().unwrap_or(0),
                    )
                });
                Ok(Some(SseEvent::MessageDelta { stop_reason, usage }))
            }

            "message_stop" => Ok(Some(SseEvent::MessageStop)),

            "ping" => Ok(Some(SseEvent::Ping)),

            _ => {
                if data.trim() == "[DONE]" {
                    Ok(Some(SseEvent::MessageStop))
                } else {
                    tracing::trace!(event_type, "ignoring unknown SSE event type");
                    Ok(None)
                }
            }
        }
    }
}

fn parse_json(data: &str) -> Result<Value> {
    serde_json::from_str(data).map_err(|e| EngineError::StreamError {
        reason: format!("invalid JSON in SSE data: {e}"),
    })
}

fn json_string(v: &Value, field: &str) -> String {
    v[field].as_str().unwrap_or_default().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_start() {
        let mut parser = SseParser::new();
        assert!(parser.parse_line("event: message_start").unwrap().is_none());
        let event = parser
            .parse_line(r#"data: {"type":"message_start","message":{"id":"msg_01","model":"claude-sonnet-4-20250514","role":"assistant","content":[],"stop_reason":null,"usage":{"input_tokens":10,"output_tokens":0}}}"#)
            .unwrap()
            .unwrap();

        match event {
            SseEvent::MessageStart { message_id, model } => {
                assert_eq!(message_id, "msg_01");
                assert_eq!(model, "claude-sonnet-4-20250514");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_text_delta() {
        let mut parser = SseParser::new();
        assert!(
            parser
                .parse_line("event: content_block_delta")
                .unwrap()
                .is_none()
        );
        let event = parser
            .parse_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#)
            .unwrap()
            .unwrap();

        match event {
            SseEvent::ContentBlockDelta { index, delta } => {
                assert_eq!(index, 0);
                match delta {
                    SseDelta::TextDelta(t) => assert_eq!(t, "Hello"),
                    other => panic!("unexpected delta: {other:?}"),
                }
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_input_json_delta() {
        let mut parser = SseParser::new();
        assert!(
            parser
                .parse_line("event: content_block_delta")
                .unwrap()
                .is_none()
        );
        let event = parser
            .parse_line(r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#)
            .unwrap()
            .unwrap();

        match event {
            SseEvent::ContentBlockDelta { index, delta } => {
                assert_eq!(index, 1);
                match delta {
                    SseDelta::InputJsonDelta(j) => assert_eq!(j, r#"{"path":"#),
                    other => panic!("unexpected delta: {other:?}"),
                }
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_message_stop() {
        let mut parser = SseParser::new();
        assert!(parser.parse_line("event: message_stop").unwrap().is_none());
        let event = parser.parse_line("data: {}").unwrap().unwrap();
        assert!(matches!(event, SseEvent::MessageStop));
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.parse_line("").unwrap().is_none());
        assert!(parser.parse_line(": keepalive").unwrap().is_none());
    }

    #[test]
    fn ping_event() {
        let mut parser = SseParser::new();
        assert!(parser.parse_line("event: ping").unwrap().is_none());
        let event = parser.parse_line("data: {}").unwrap().unwrap();
        assert!(matches!(event, SseEvent::Ping));
    }

    #[test]
    fn done_sentinel_maps_to_message_stop() {
        let mut parser = SseParser::new();
        let event = parser.parse_line("data: [DONE]").unwrap().unwrap();
        assert!(matches!(event, SseEvent::MessageStop));
    }
}
