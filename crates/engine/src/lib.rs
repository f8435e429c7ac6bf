//! Agentic execution engine for AgentSpec.
//!
//! This crate implements the core of an AgentSpec runtime: the LLM provider
//! abstraction, the tool executor, the five interchangeable agent
//! strategies, the delegation router, and the pipeline DAG scheduler. The
//! parser/validator/CLI/deploy layers that produce the definitions this
//! engine executes are external collaborators, not part of this crate.
//!
//! ## Modules
//!
//! - [`llm`] -- provider-agnostic chat/streaming types, Anthropic and
//!   OpenAI-compatible transports, model-string routing.
//! - [`tokens`] -- cumulative usage tracking against an optional budget.
//! - [`tools`] -- the tool executor contract and its four dispatch variants
//!   (command, HTTP, MCP, inline).
//! - [`strategies`] -- ReAct, Plan-and-Execute, Reflexion, Map-Reduce, and
//!   Router, sharing one invocation/response contract, plus a
//!   [`strategies::StrategyRegistry`] resolving a strategy by name.
//! - [`delegation`] -- an LLM-backed classifier that hands an input off to
//!   a named agent based on natural-language rules.
//! - [`pipeline`] -- a DAG scheduler over named steps with dependencies,
//!   guards, and concurrent dispatch.
//! - [`session`] -- the session message store interface plus an in-process
//!   sliding-window implementation.
//! - [`config`] -- environment-derived engine configuration.
//! - [`error`] -- the crate-wide error type.

pub mod config;
pub mod delegation;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod session;
pub mod strategies;
pub mod tokens;
pub mod tools;

pub use config::EngineConfig;
pub use delegation::{DelegationDecision, DelegationRouter, DelegationRule};
pub use error::{EngineError, Result};
pub use llm::{
    ChatRequest, ChatResponse, LlmClient, Message, Provider, Role, StopReason, StreamEvent,
    TokenUsage, ToolCall, ToolDefinition, ToolResult, client_for_model, parse_model_string,
};
pub use pipeline::{PipelineResult, PipelineStep, StepOutput, StepRunner, run_pipeline};
pub use session::{Session, SessionStore, SlidingWindowSessionStore};
pub use strategies::{Invocation, Response, Strategy, StrategyRegistry, StreamCallback, ToolCallRecord};
pub use strategies::map_reduce::MapReduceStrategy;
pub use strategies::plan_execute::PlanAndExecuteStrategy;
pub use strategies::react::ReactStrategy;
pub use strategies::reflexion::ReflexionStrategy;
pub use strategies::router::{AgentInvoker, RouterStrategy};
pub use tokens::TokenTracker;
pub use tools::{ToolBackend, ToolExecutor, ToolRegistry};
