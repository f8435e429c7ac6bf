//! Shared strategy contract and the five interchangeable agent loops.
//!
//! Common bookkeeping — message construction, token tracking, tool-round
//! appending — is factored out of each loop body into the free functions
//! below so every strategy reuses it instead of duplicating it.

pub mod map_reduce;
pub mod plan_execute;
pub mod react;
pub mod reflexion;
pub mod router;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::llm::provider::LlmClient;
use crate::llm::types::{ChatRequest, Message, StreamEvent, TokenUsage, ToolCall};
use crate::tools::ToolExecutor;

/// A caller-supplied sink for streamed/synthetic events during `execute`.
pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// What a strategy is asked to do.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub agent: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub input: String,
    pub messages: Vec<Message>,
    pub max_turns: u32,
    pub max_tokens: u32,
    pub token_budget: u64,
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl Invocation {
    pub fn new(agent: impl Into<String>, model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            model: model.into(),
            system_prompt: None,
            input: input.into(),
            messages: Vec::new(),
            max_turns: 10,
            max_tokens: 4096,
            token_budget: 0,
            temperature: None,
            stream: false,
        }
    }

    /// The initial message list: prior messages plus the new user turn.
    fn initial_messages(&self) -> Vec<Message> {
        let mut messages = self.messages.clone();
        messages.push(Message::user(self.input.clone()));
        messages
    }
}

/// A persistent audit record of one tool invocation within a `Response`.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: HashMap<String, serde_json::Value>,
    pub output: String,
    pub duration: Duration,
    pub error: Option<String>,
}

/// The result of a strategy's `execute` call.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub output: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: TokenUsage,
    pub turns: u32,
    pub duration: Duration,
    /// Set for a graceful stop (budget exhaustion) — `output` still holds
    /// whatever partial text was produced. Never set for a hard failure,
    /// which is returned as an `Err` from `execute` instead.
    pub error: Option<String>,
}

/// The contract every strategy implements.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        ctx: CancellationToken,
        invocation: Invocation,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
        on_event: Option<StreamCallback>,
    ) -> Result<Response>;
}

/// Resolves a strategy name string to the `Strategy` implementation that
/// runs it, built once at startup, mirroring [`crate::tools::ToolRegistry`]'s
/// own name-to-implementation map.
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, strategy: Box<dyn Strategy>) {
        self.strategies.insert(name, strategy);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Strategy> {
        self.strategies.get(name).map(|s| s.as_ref())
    }

    /// The five built-in strategies registered under their own `name()`.
    /// `map_reduce` defaults to whole-input (paragraph) chunking and
    /// `router` starts with no routes configured — callers that need
    /// either customised should construct and `register` their own
    /// instance instead of using this default set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("react", Box::new(react::ReactStrategy));
        registry.register("plan_execute", Box::new(plan_execute::PlanAndExecuteStrategy));
        registry.register("reflexion", Box::new(reflexion::ReflexionStrategy));
        registry.register("map_reduce", Box::new(map_reduce::MapReduceStrategy::new(0)));
        registry.register("router", Box::new(router::RouterStrategy::new(HashMap::new(), None)));
        registry
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a [`ChatRequest`] for the next turn of a strategy loop.
pub(crate) fn build_request(
    invocation: &Invocation,
    messages: Vec<Message>,
    tools: &[crate::llm::types::ToolDefinition],
) -> ChatRequest {
    ChatRequest {
        model: invocation.model.clone(),
        messages,
        system: invocation.system_prompt.clone(),
        tools: tools.to_vec(),
        max_tokens: invocation.max_tokens,
        temperature: invocation.temperature,
    }
}

/// Execute a batch of tool calls, append the assistant call + each tool
/// result to `messages` in call order, and record an audit entry per call.
pub(crate) async fn run_tool_round(
    ctx: CancellationToken,
    tools: &Arc<dyn ToolExecutor>,
    assistant_text: Option<String>,
    calls: Vec<ToolCall>,
    messages: &mut Vec<Message>,
    records: &mut Vec<ToolCallRecord>,
    on_event: Option<&StreamCallback>,
) {
    debug!(calls = calls.len(), "running tool round");
    messages.push(Message::assistant_tool_calls(assistant_text, calls.clone()));

    let started: Vec<Instant> = calls.iter().map(|_| Instant::now()).collect();
    let results = tools.execute_concurrent(ctx, calls.clone()).await;

    for ((call, result), started_at) in calls.into_iter().zip(results.into_iter()).zip(started) {
        if let Some(cb) = on_event {
            cb(StreamEvent::ToolCallEnd(ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            }));
        }
        records.push(ToolCallRecord {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
            output: result.content.clone(),
            duration: started_at.elapsed(),
            error: result.is_error.then(|| result.content.clone()),
        });
        messages.push(Message::tool_result(result));
    }
}

/// Emit a synthetic stream event, if the caller registered a callback.
pub(crate) fn emit(on_event: &Option<StreamCallback>, event: StreamEvent) {
    if let Some(cb) = on_event {
        cb(event);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::llm::types::{ChatResponse, StopReason};
    use crate::llm::provider::EventStream;
    use std::sync::Mutex;

    /// Replays a fixed sequence of [`ChatResponse`]s, one per `chat` call.
    pub struct ScriptedLlmClient {
        responses: Mutex<std::collections::VecDeque<ChatResponse>>,
    }

    impl ScriptedLlmClient {
        pub fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| crate::error::EngineError::Internal("script exhausted".into()))
        }

        async fn chat_stream(&self, _request: ChatRequest) -> Result<EventStream> {
            let response = self.chat(_request).await?;
            let events = vec![StreamEvent::Done(response)];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    pub fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            text: text.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage {
                input: 10,
                output: 5,
                cache_read: 0,
                cache_write: 0,
            },
        }
    }

    pub fn tool_call_response(text: &str, calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            text: text.into(),
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input: 10,
                output: 5,
                cache_read: 0,
                cache_write: 0,
            },
        }
    }

    pub struct NoopToolExecutor;

    #[async_trait]
    impl ToolExecutor for NoopToolExecutor {
        async fn execute(&self, call: &ToolCall) -> Result<String> {
            Ok(format!("result for {}", call.name))
        }
    }
}
