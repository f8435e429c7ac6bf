//! Reflexion: answer, then critique-and-revise until satisfactory.
//!
//! The initial answer (and its optional tool round) is not allowed to fail
//! silently; once the loop enters the critique/improve phase, a failed call
//! ends the loop gracefully with the best output produced so far instead of
//! propagating the error.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::llm::provider::LlmClient;
use crate::llm::types::{Message, StopReason};
use crate::strategies::{Invocation, Response, Strategy, StreamCallback, build_request, run_tool_round};
use crate::tokens::TokenTracker;
use crate::tools::ToolExecutor;

const SATISFACTORY_SENTINEL: &str = "satisfactory";

pub struct ReflexionStrategy;

#[async_trait]
impl Strategy for ReflexionStrategy {
    fn name(&self) -> &str {
        "reflexion"
    }

    async fn execute(
        &self,
        ctx: CancellationToken,
        invocation: Invocation,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
        on_event: Option<StreamCallback>,
    ) -> Result<Response> {
        info!(agent = %invocation.agent, "reflexion invocation starting");
        let start = Instant::now();
        let tracker = TokenTracker::new(invocation.token_budget);
        let tool_defs = tools.definitions();
        let mut messages = invocation.initial_messages();
        let mut records = Vec::new();
        let mut turns = 0u32;
        let mut error = None;

        // -- Initial answer --------------------------------------------------
        let request = build_request(&invocation, messages.clone(), &tool_defs);
        let response = llm.chat(request).await.map_err(|e| EngineError::StrategyFailed {
            strategy: self.name().into(),
            turn: turns,
            reason: e.to_string(),
        })?;
        tracker.add(&response.usage);
        turns += 1;

        let mut current_output = if response.stop_reason == StopReason::ToolUse && !response.tool_calls.is_empty() {
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

            let follow_up = build_request(&invocation, messages.clone(), &[]);
            let follow_response = llm.chat(follow_up).await.map_err(|e| EngineError::StrategyFailed {
                strategy: self.name().into(),
                turn: turns,
                reason: e.to_string(),
            })?;
            tracker.add(&follow_response.usage);
            turns += 1;
            messages.push(Message::assistant(follow_response.text.clone()));
            follow_response.text
        } else {
            messages.push(Message::assistant(response.text.clone()));
            response.text
        };

        // -- Critique / improve loop -----------------------------------------
        let critique_iterations = invocation.max_turns.saturating_sub(2);
        for _ in 0..critique_iterations {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Err(e) = tracker.check_budget(0) {
                warn!(agent = %invocation.agent, "stopping reflexion: token budget exhausted");
                error = Some(e.to_string());
                break;
            }

            debug!(agent = %invocation.agent, turn = turns, "requesting critique");
            let mut critique_messages = messages.clone();
            critique_messages.push(Message::user(
                "Critique your previous response. If it is acceptable as-is, reply with \
                 exactly the word SATISFACTORY. Otherwise explain what is wrong with it.",
            ));
            let critique_request = build_request(&invocation, critique_messages, &[]);
            let critique_response = match llm.chat(critique_request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(agent = %invocation.agent, error = %e, "critique call failed, returning best output so far");
                    break;
                }
            };
            tracker.add(&critique_response.usage);
            turns += 1;
            messages.push(Message::assistant(critique_response.text.clone()));

            if critique_response
                .text
                .trim()
                .to_lowercase()
                .contains(SATISFACTORY_SENTINEL)
            {
                debug!(agent = %invocation.agent, turn = turns, "critique reports satisfactory, stopping");
                break;
            }

            let mut improve_messages = messages.clone();
            improve_messages.push(Message::user("Provide an improved response addressing the critique above."));
            let improve_request = build_request(&invocation, improve_messages, &[]);
            let improve_response = match llm.chat(improve_request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(agent = %invocation.agent, error = %e, "improve call failed, returning best output so far");
                    break;
                }
            };
            tracker.add(&improve_response.usage);
            turns += 1;
            current_output = improve_response.text.clone();
            messages.push(Message::assistant(current_output.clone()));
        }

        info!(agent = %invocation.agent, turns, "reflexion invocation completed");
        Ok(Response {
            output: current_output,
            tool_calls: records,
            usage: tracker.usage(),
            turns,
            duration: start.elapsed(),
            error,
        })
    }
}
