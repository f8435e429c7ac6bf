//! ReAct: a turn-bounded observe/act loop.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::llm::provider::LlmClient;
use crate::llm::types::{StopReason, StreamEvent};
use crate::strategies::{Invocation, Response, Strategy, StreamCallback, build_request, emit, run_tool_round};
use crate::tokens::TokenTracker;
use crate::tools::ToolExecutor;

pub struct ReactStrategy;

#[async_trait]
impl Strategy for ReactStrategy {
    fn name(&self) -> &str {
        "react"
    }

    async fn execute(
        &self,
        ctx: CancellationToken,
        invocation: Invocation,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
        on_event: Option<StreamCallback>,
    ) -> Result<Response> {
        info!(agent = %invocation.agent, max_turns = invocation.max_turns, "react invocation starting");
        let start = Instant::now();
        let tracker = TokenTracker::new(invocation.token_budget);
        let tool_defs = tools.definitions();
        let mut messages = invocation.initial_messages();
        let mut records = Vec::new();
        let mut output = String::new();
        let mut error = None;
        let mut turns = 0u32;

        while turns < invocation.max_turns {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Err(e) = tracker.check_budget(0) {
                warn!(agent = %invocation.agent, turn = turns, "stopping react loop: token budget exhausted");
                error = Some(e.to_string());
                break;
            }
            debug!(agent = %invocation.agent, turn = turns, "react turn starting");

            let request = build_request(&invocation, messages.clone(), &tool_defs);

            let response = if invocation.stream && on_event.is_some() {
                let mut stream = llm.chat_stream(request).await?;
                let mut done = None;
                while let Some(event) = stream.next().await {
                    match &event {
                        StreamEvent::Done(r) => done = Some(r.clone()),
                        StreamEvent::Error(reason) => {
                            return Err(EngineError::StreamError {
                                reason: reason.clone(),
                            });
                        }
                        _ => {}
                    }
                    emit(&on_event, event);
                }
                done.ok_or_else(|| EngineError::StreamError {
                    reason: "stream ended without a terminal event".into(),
                })?
            } else {
                llm.chat(request).await.map_err(|e| EngineError::StrategyFailed {
                    strategy: self.name().into(),
                    turn: turns,
                    reason: e.to_string(),
                })?
            };

            tracker.add(&response.usage);
            turns += 1;
            output = response.text.clone();

            if response.stop_reason != StopReason::ToolUse || response.tool_calls.is_empty() {
                break;
            }

            run_tool_round(
                ctx.clone(),
                &tools,
                Some(response.text),
                response.tool_calls,
                &mut messages,
                &mut records,
                on_event.as_ref(),
            )
            .await;
        }

        info!(agent = %invocation.agent, turns, "react invocation completed");
        Ok(Response {
            output,
            tool_calls: records,
            usage: tracker.usage(),
            turns,
            duration: start.elapsed(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::{NoopToolExecutor, ScriptedLlmClient, text_response, tool_call_response};
    use std::collections::HashMap;

    #[tokio::test]
    async fn stops_as_soon_as_the_model_produces_no_tool_calls() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![text_response("done")]));
        let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);
        let strategy = ReactStrategy;

        let invocation = Invocation::new("agent", "claude-3", "hello");
        let response = strategy
            .execute(CancellationToken::new(), invocation, llm, tools, None)
            .await
            .unwrap();

        assert_eq!(response.output, "done");
        assert_eq!(response.turns, 1);
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn executes_tool_calls_then_continues_the_loop() {
        let call = crate::llm::types::ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            input: HashMap::new(),
        };
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![
            tool_call_response("searching", vec![call]),
            text_response("found it"),
        ]));
        let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);
        let strategy = ReactStrategy;

        let invocation = Invocation::new("agent", "claude-3", "look something up");
        let response = strategy
            .execute(CancellationToken::new(), invocation, llm, tools, None)
            .await
            .unwrap();

        assert_eq!(response.output, "found it");
        assert_eq!(response.turns, 2);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "search");
    }

    #[tokio::test]
    async fn respects_max_turns_even_when_model_keeps_requesting_tools() {
        let call = || crate::llm::types::ToolCall {
            id: "call".into(),
            name: "search".into(),
            input: HashMap::new(),
        };
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![
            tool_call_response("1", vec![call()]),
            tool_call_response("2", vec![call()]),
            tool_call_response("3", vec![call()]),
        ]));
        let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);
        let strategy = ReactStrategy;

        let mut invocation = Invocation::new("agent", "claude-3", "loop forever");
        invocation.max_turns = 3;
        let response = strategy
            .execute(CancellationToken::new(), invocation, llm, tools, None)
            .await
            .unwrap();

        assert_eq!(response.turns, 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_is_a_graceful_stop_not_an_error() {
        let call = crate::llm::types::ToolCall {
            id: "call_1".into(),
            name: "search".into(),
            input: HashMap::new(),
        };
        // First response costs 15 tokens (10 input + 5 output) and requests
        // a tool call, so the loop keeps going; the second scripted
        // response would cost another 15 but is never reached because the
        // budget check at the top of turn two already trips against it.
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![
            tool_call_response("partial", vec![call]),
            text_response("never reached"),
        ]));
        let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);
        let strategy = ReactStrategy;

        let mut invocation = Invocation::new("agent", "claude-3", "hello");
        invocation.token_budget = 10;
        let response = strategy
            .execute(CancellationToken::new(), invocation, llm, tools, None)
            .await
            .unwrap();

        assert_eq!(response.output, "partial");
        assert_eq!(response.turns, 1);
        let error = response.error.expect("budget exhaustion must set Response.error");
        assert!(error.contains("token budget exceeded"));
    }
}
