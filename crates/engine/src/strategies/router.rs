//! Router: classify the input to a named agent, then delegate to it.
//!
//! Unlike [`crate::delegation::DelegationRouter`], which matches against a
//! local rule list, this strategy has no rules to match against — it asks
//! the model to name the agent outright and hands off via a free-form
//! `AgentInvoker` callback.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::llm::provider::LlmClient;
use crate::llm::types::Message;
use crate::strategies::react::ReactStrategy;
use crate::strategies::{Invocation, Response, Strategy, StreamCallback, build_request};
use crate::tools::ToolExecutor;

/// Resolves a classified agent name to a running strategy invocation.
/// Supplied by the host embedding the engine, which alone knows how to
/// resolve agent names — the engine itself never looks agents up.
pub type AgentInvoker = Arc<dyn Fn(&str, Invocation) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

pub struct RouterStrategy {
    routes: HashMap<String, String>,
    invoker: Option<AgentInvoker>,
}

impl RouterStrategy {
    pub fn new(routes: HashMap<String, String>, invoker: Option<AgentInvoker>) -> Self {
        Self { routes, invoker }
    }

    fn classification_prompt(&self) -> String {
        let mut lines = vec!["Choose the agent best suited to handle the request. Reply with only the agent name.".to_string()];
        for (name, description) in &self.routes {
            lines.push(format!("- {name}: {description}"));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Strategy for RouterStrategy {
    fn name(&self) -> &str {
        "router"
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

        if self.routes.is_empty() || self.invoker.is_none() {
            debug!(agent = %invocation.agent, "no routes or invoker configured, falling back to react");
            return ReactStrategy.execute(ctx, invocation, llm, tools, on_event).await;
        }
        let invoker = self.invoker.as_ref().expect("checked above");

        let mut classify_messages = invocation.messages.clone();
        classify_messages.push(Message::user(format!("{}\n\nRequest: {}", self.classification_prompt(), invocation.input)));
        let mut classify_request = build_request(&invocation, classify_messages, &[]);
        classify_request.max_tokens = 50;

        let classify_response = llm.chat(classify_request).await.map_err(|e| EngineError::StrategyFailed {
            strategy: self.name().into(),
            turn: 0,
            reason: e.to_string(),
        })?;

        let chosen = classify_response.text.trim();
        let agent_name = self
            .routes
            .keys()
            .find(|name| chosen.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| invocation.agent.clone());
        info!(agent = %invocation.agent, classified_as = %agent_name, "router classified request");

        let mut delegated = invocation.clone();
        delegated.agent = agent_name.clone();

        let mut response = invoker(&agent_name, delegated).await?;
        response.usage.add(&classify_response.usage);
        response.turns += 1;
        response.duration = start.elapsed();

        Ok(response)
    }
}
