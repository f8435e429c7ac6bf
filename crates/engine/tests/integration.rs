//! Integration tests for the agentspec-engine crate.
//!
//! These exercise the public API across module boundaries without
//! requiring a live LLM connection: message construction/serialization,
//! model-string routing, configuration, token tracking, delegation, and
//! the ReAct strategy driven by a scripted in-process `LlmClient`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agentspec_engine::{
    ChatRequest, ChatResponse, DelegationRouter, DelegationRule, EngineConfig, Invocation,
    LlmClient, Message, Provider, ReactStrategy, Result, Role, Strategy, StopReason,
    StreamEvent, TokenTracker, TokenUsage, ToolExecutor, parse_model_string,
};

/// Replays a fixed sequence of responses, one per `chat` call.
struct ScriptedLlmClient {
    responses: Mutex<std::collections::VecDeque<ChatResponse>>,
}

impl ScriptedLlmClient {
    fn new(responses: Vec<ChatResponse>) -> Self {
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
            .ok_or_else(|| agentspec_engine::EngineError::Internal("script exhausted".into()))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<agentspec_engine::llm::EventStream> {
        let response = self.chat(request).await?;
        Ok(Box::pin(futures::stream::iter(vec![StreamEvent::Done(response)])))
    }
}

fn text_response(text: &str) -> ChatResponse {
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

struct NoopToolExecutor;

#[async_trait]
impl ToolExecutor for NoopToolExecutor {
    async fn execute(&self, call: &agentspec_engine::ToolCall) -> Result<String> {
        Ok(format!("result for {}", call.name))
    }
}

#[test]
fn message_constructors_and_serialization_roundtrip() {
    let user = Message::user("hello there");
    assert_eq!(user.role, Role::User);

    let json = serde_json::to_string(&user).unwrap();
    let parsed: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.content.as_deref(), Some("hello there"));
    assert_eq!(parsed.role, Role::User);
}

#[test]
fn model_string_routing_follows_prefix_then_heuristic_then_env() {
    let (provider, model) = parse_model_string("anthropic/claude-3-opus");
    assert_eq!(provider, Provider::Anthropic);
    assert_eq!(model, "claude-3-opus");

    let (provider, _) = parse_model_string("gpt-4o");
    assert_eq!(provider, Provider::OpenAi);
}

#[test]
fn engine_config_builds_with_sane_defaults_even_without_provider_credentials() {
    let config = EngineConfig::from_env().unwrap();
    assert!(config.default_max_turns > 0);
    assert!(config.default_max_tokens > 0);
}

#[test]
fn token_tracker_rejects_once_the_budget_is_exceeded() {
    let tracker = TokenTracker::new(50);
    tracker.add(&TokenUsage {
        input: 30,
        output: 10,
        cache_read: 0,
        cache_write: 0,
    });
    assert!(tracker.check_budget(5).is_ok());
    assert!(tracker.check_budget(20).is_err());
}

#[tokio::test]
async fn react_strategy_runs_end_to_end_against_a_scripted_client() {
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![text_response("the answer is 4")]));
    let tools: Arc<dyn ToolExecutor> = Arc::new(NoopToolExecutor);

    let invocation = Invocation::new("demo-agent", "claude-3-sonnet", "what is 2+2?");
    let response = ReactStrategy
        .execute(CancellationToken::new(), invocation, llm, tools, None)
        .await
        .unwrap();

    assert_eq!(response.output, "the answer is 4");
    assert_eq!(response.turns, 1);
}

#[tokio::test]
async fn delegation_router_hands_off_when_a_rule_matches() {
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![text_response("billing")]));
    let rules = vec![DelegationRule {
        condition: "billing questions".into(),
        target_agent: "billing".into(),
    }];
    let router = DelegationRouter::new(rules, llm, "claude-3-sonnet");

    let decision = router.evaluate("I was double charged on my invoice").await.unwrap();
    assert!(decision.should_delegate);
    assert_eq!(decision.target_agent.as_deref(), Some("billing"));
}
