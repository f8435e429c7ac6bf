//! Map-Reduce: split input into chunks, run ReAct over each in parallel,
//! then reduce the partial outputs into one answer.
//!
//! Chunks fan out over a one-shot `tokio::task::JoinSet` rather than a
//! persistent worker pool — each chunk only ever runs once.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::llm::provider::LlmClient;
use crate::llm::types::{Message, TokenUsage};
use crate::strategies::react::ReactStrategy;
use crate::strategies::{Invocation, Response, Strategy, StreamCallback, ToolCallRecord, build_request};
use crate::tools::ToolExecutor;

/// Map-Reduce's one strategy-specific parameter, kept off the shared
/// `Invocation` rather than growing it with per-strategy fields.
pub struct MapReduceStrategy {
    chunk_size: usize,
}

impl MapReduceStrategy {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

/// Split `input` into chunks: fixed-size character chunks when
/// `chunk_size > 0`, else paragraph splitting on blank lines, falling back
/// to the whole input as a single chunk.
fn chunk_input(input: &str, chunk_size: usize) -> Vec<String> {
    if chunk_size > 0 {
        return input
            .chars()
            .collect::<Vec<_>>()
            .chunks(chunk_size)
            .map(|c| c.iter().collect())
            .collect();
    }

    let paragraphs: Vec<String> = input
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect();

    if paragraphs.is_empty() {
        vec![input.trim().to_owned()]
    } else {
        paragraphs
    }
}

#[async_trait]
impl Strategy for MapReduceStrategy {
    fn name(&self) -> &str {
        "map_reduce"
    }

    async fn execute(
        &self,
        ctx: CancellationToken,
        invocation: Invocation,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
        on_event: Option<StreamCallback>,
    ) -> Result<Response> {
        let start = Instant::now();
        let chunks = chunk_input(&invocation.input, self.chunk_size);
        info!(agent = %invocation.agent, chunks = chunks.len(), "map_reduce invocation starting");

        if chunks.len() <= 1 {
            debug!(agent = %invocation.agent, "single chunk, delegating to react");
            return ReactStrategy.execute(ctx, invocation, llm, tools, on_event).await;
        }

        let group_ctx = ctx.child_token();
        let mut join_set = tokio::task::JoinSet::new();

        for (index, chunk) in chunks.iter().cloned().enumerate() {
            let child_ctx = group_ctx.child_token();
            let mut child_invocation = invocation.clone();
            child_invocation.input = chunk;
            child_invocation.stream = false;
            let llm = llm.clone();
            let tools = tools.clone();

            join_set.spawn(async move {
                let result = ReactStrategy.execute(child_ctx, child_invocation, llm, tools, None).await;
                (index, result)
            });
        }

        let mut mapper_responses: Vec<Option<Response>> = (0..chunks.len()).map(|_| None).collect();
        let mut first_error = None;

        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined.map_err(|e| EngineError::Internal(format!("mapper task panicked: {e}")))?;
            match result {
                Ok(response) => mapper_responses[index] = Some(response),
                Err(e) => {
                    if first_error.is_none() {
                        warn!(agent = %invocation.agent, chunk = index, error = %e, "mapper chunk failed, cancelling siblings");
                        first_error = Some(e);
                        group_ctx.cancel();
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let mut total_usage = TokenUsage::default();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut parts = Vec::with_capacity(chunks.len());

        for (i, response) in mapper_responses.into_iter().enumerate() {
            let response = response.expect("every chunk produced a response or an error was returned above");
            total_usage.add(&response.usage);
            records.extend(response.tool_calls);
            parts.push(format!("--- Part {} ---\n{}", i + 1, response.output));
        }

        debug!(agent = %invocation.agent, "reducing mapper outputs");
        let combined = parts.join("\n\n");
        let mut reduce_messages = invocation.messages.clone();
        reduce_messages.push(Message::user(format!(
            "Combine the following partial results into a single coherent answer:\n\n{combined}"
        )));
        let reduce_request = build_request(&invocation, reduce_messages, &[]);
        let reduce_response = llm.chat(reduce_request).await.map_err(|e| EngineError::StrategyFailed {
            strategy: self.name().into(),
            turn: chunks.len() as u32 + 1,
            reason: e.to_string(),
        })?;
        total_usage.add(&reduce_response.usage);
        info!(agent = %invocation.agent, chunks = chunks.len(), "map_reduce invocation completed");

        Ok(Response {
            output: reduce_response.text,
            tool_calls: records,
            usage: total_usage,
            // Fixed at len(chunks) + 2 (one map turn per chunk plus a
            // classification-equivalent reduce turn), regardless of how many
            // turns any individual chunk's ReAct run actually took.
            turns: chunks.len() as u32 + 2,
            duration: start.elapsed(),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::test_support::{NoopToolExecutor, ScriptedLlmClient, text_response};

    #[test]
    fn fixed_size_chunking_splits_by_character_count() {
        let chunks = chunk_input("abcdefgh", 3);
        assert_eq!(chunks, vec!["abc", "def", "gh"]);
    }

    #[test]
    fn paragraph_chunking_splits_on_blank_lines_and_trims() {
        let chunks = chunk_input("first para\n\n  second para  \n\nthird", 0);
        assert_eq!(chunks, vec!["first para", "second para", "third"]);
    }

    #[test]
    fn empty_paragraph_split_falls_back_to_whole_input() {
        let chunks = chunk_input("just one line, no blank separators", 0);
        assert_eq!(chunks, vec!["just one line, no blank separators"]);
    }

    #[tokio::test]
    async fn single_chunk_delegates_to_react() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![text_response("direct answer")]));
        let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);
        let strategy = MapReduceStrategy::new(0);

        let invocation = Invocation::new("agent", "claude-3", "single paragraph input");
        let response = strategy
            .execute(CancellationToken::new(), invocation, llm, tools, None)
            .await
            .unwrap();

        assert_eq!(response.output, "direct answer");
        // Delegated straight to ReAct, so turns follow ReAct's own count,
        // not the len(chunks) + 2 map-reduce formula.
        assert_eq!(response.turns, 1);
    }

    #[tokio::test]
    async fn multi_chunk_reports_len_chunks_plus_two_turns() {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![
            text_response("map 1"),
            text_response("map 2"),
            text_response("reduced"),
        ]));
        let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);
        let strategy = MapReduceStrategy::new(0);

        let invocation = Invocation::new("agent", "claude-3", "first paragraph\n\nsecond paragraph");
        let response = strategy
            .execute(CancellationToken::new(), invocation, llm, tools, None)
            .await
            .unwrap();

        assert_eq!(response.output, "reduced");
        assert_eq!(response.turns, 4); // len(chunks)=2 + 2, NOT the 3 actual LLM calls
    }
}
