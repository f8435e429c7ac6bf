//! Plan-and-Execute: decompose into numbered steps, then execute each in
//! turn. The model is asked for a structured decomposition and the result
//! is parsed defensively against a `STEP N:` line-prefix contract.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::llm::provider::LlmClient;
use crate::llm::types::{Message, StopReason, StreamEvent};
use crate::strategies::{Invocation, Response, Strategy, StreamCallback, build_request, emit, run_tool_round};
use crate::tokens::TokenTracker;
use crate::tools::ToolExecutor;

pub struct PlanAndExecuteStrategy;

/// Count lines beginning with `STEP ` or `Step ` (case-sensitive prefix),
/// minimum one.
fn count_steps(plan_text: &str) -> u32 {
    let counted = plan_text
        .lines()
        .filter(|line| line.starts_with("STEP ") || line.starts_with("Step "))
        .count() as u32;
    counted.max(1)
}

#[async_trait]
impl Strategy for PlanAndExecuteStrategy {
    fn name(&self) -> &str {
        "plan_execute"
    }

    async fn execute(
        &self,
        ctx: CancellationToken,
        invocation: Invocation,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
        on_event: Option<StreamCallback>,
    ) -> Result<Response> {
        info!(agent = %invocation.agent, "plan_execute invocation starting");
        let start = Instant::now();
        let tracker = TokenTracker::new(invocation.token_budget);
        let tool_defs = tools.definitions();
        let mut messages = invocation.initial_messages();
        let mut records = Vec::new();
        let mut turns = 0u32;
        let mut error = None;

        // -- Plan phase --------------------------------------------------
        let mut plan_messages = messages.clone();
        plan_messages.push(Message::user(
            "Decompose the task above into a numbered plan. Reply with one line per \
             step, each formatted exactly as `STEP N: <description>`.",
        ));
        let plan_request = build_request(&invocation, plan_messages, &[]);
        let plan_response = llm.chat(plan_request).await.map_err(|e| EngineError::PlanningFailed {
            reason: e.to_string(),
        })?;
        tracker.add(&plan_response.usage);
        turns += 1;

        emit(&on_event, StreamEvent::Text(format!("Plan:\n{}", plan_response.text)));
        messages.push(Message::assistant(plan_response.text.clone()));

        let step_count = count_steps(&plan_response.text);
        let steps_to_run = step_count.min(invocation.max_turns.saturating_sub(1));
        debug!(agent = %invocation.agent, step_count, steps_to_run, "plan produced");

        let mut output = plan_response.text;

        // -- Execute phase -------------------------------------------------
        for step in 0..steps_to_run {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Err(e) = tracker.check_budget(0) {
                warn!(agent = %invocation.agent, step, "stopping plan_execute: token budget exhausted");
                error = Some(e.to_string());
                break;
            }

            debug!(agent = %invocation.agent, step, "executing plan step");
            messages.push(Message::user(format!(
                "Execute step {} of the plan. Use available tools as needed.",
                step + 1
            )));

            let request = build_request(&invocation, messages.clone(), &tool_defs);
            let response = llm.chat(request).await.map_err(|e| EngineError::StrategyFailed {
                strategy: self.name().into(),
                turn: turns,
                reason: e.to_string(),
            })?;
            tracker.add(&response.usage);
            turns += 1;
            output = response.text.clone();

            if response.stop_reason == StopReason::ToolUse && !response.tool_calls.is_empty() {
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
            } else {
                messages.push(Message::assistant(response.text));
            }
        }

        info!(agent = %invocation.agent, turns, "plan_execute invocation completed");
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
    use crate::strategies::test_support::{NoopToolExecutor, ScriptedLlmClient, text_response};

    #[test]
    fn counts_step_prefixed_lines() {
        let plan = "STEP 1: search\nSTEP 2: summarize\nsome other line\n";
        assert_eq!(count_steps(plan), 2);
    }

    #[test]
    fn falls_back_to_one_step_when_no_prefix_found() {
        assert_eq!(count_steps("just do it"), 1);
    }

    #[tokio::test]
    async fn turns_equals_plan_plus_executed_steps() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![
            text_response("STEP 1: find files\nSTEP 2: summarize them"),
            text_response("found files"),
            text_response("summary ready"),
        ]));
        let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);
        let strategy = PlanAndExecuteStrategy;

        let mut invocation = Invocation::new("agent", "claude-3", "organize my files");
        invocation.max_turns = 10;
        let response = strategy
            .execute(CancellationToken::new(), invocation, llm, tools, None)
            .await
            .unwrap();

        assert_eq!(response.turns, 3);
        assert_eq!(response.output, "summary ready");
    }

    #[tokio::test]
    async fn execute_phase_is_capped_by_max_turns() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![
            text_response("STEP 1: a\nSTEP 2: b\nSTEP 3: c"),
            text_response("did a"),
        ]));
        let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);
        let strategy = PlanAndExecuteStrategy;

        let mut invocation = Invocation::new("agent", "claude-3", "three steps");
        invocation.max_turns = 2; // plan + at most 1 step
        let response = strategy
            .execute(CancellationToken::new(), invocation, llm, tools, None)
            .await
            .unwrap();

        assert_eq!(response.turns, 2);
    }
}
