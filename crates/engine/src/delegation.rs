//! Delegation router: a per-agent rule set that asks the LLM whether an
//! input should hand off to a differently named agent.
//!
//! Shares the "ask the model, then dispatch" shape with
//! [`crate::strategies::router`], specialised to matching against a local
//! rule list instead of a free-form agent invoker.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::llm::provider::LlmClient;
use crate::llm::types::{ChatRequest, Message};

/// One candidate handoff: a natural-language condition and the agent to
/// delegate to when the model's classification names it.
#[derive(Debug, Clone)]
pub struct DelegationRule {
    pub condition: String,
    pub target_agent: String,
}

/// The outcome of evaluating a [`DelegationRouter`] against an input.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationDecision {
    pub should_delegate: bool,
    pub target_agent: Option<String>,
    pub confidence: f32,
}

impl DelegationDecision {
    fn none() -> Self {
        Self {
            should_delegate: false,
            target_agent: None,
            confidence: 0.0,
        }
    }
}

/// Per-agent delegation configuration: a rule list evaluated by one LLM.
pub struct DelegationRouter {
    rules: Vec<DelegationRule>,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl DelegationRouter {
    pub fn new(rules: Vec<DelegationRule>, llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            rules,
            llm,
            model: model.into(),
        }
    }

    fn classification_prompt(&self, input: &str) -> String {
        let mut lines = vec![
            "Given the request below, decide whether it should be delegated to one of the \
             numbered agents. Reply with only the agent name, or NONE if it should not be \
             delegated."
                .to_string(),
        ];
        for (i, rule) in self.rules.iter().enumerate() {
            lines.push(format!("{}. {} — delegate when: {}", i + 1, rule.target_agent, rule.condition));
        }
        lines.push(format!("Request: {input}"));
        lines.join("\n")
    }

    /// Evaluate the rule set against `input`. Returns `should_delegate =
    /// false` for an empty rule set, a `NONE`/empty answer, or an answer
    /// that matches no rule's target name. An LLM failure propagates as
    /// [`EngineError::DelegationFailed`] so the caller can decide whether to
    /// proceed without delegation.
    pub async fn evaluate(&self, input: &str) -> Result<DelegationDecision> {
        if self.rules.is_empty() {
            return Ok(DelegationDecision::none());
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(self.classification_prompt(input))],
            system: None,
            tools: Vec::new(),
            max_tokens: 50,
            temperature: None,
        };

        let response = self.llm.chat(request).await.map_err(|e| {
            warn!(error = %e, "delegation classification call failed");
            EngineError::DelegationFailed { reason: e.to_string() }
        })?;

        let answer = response.text.trim();
        if answer.is_empty() || answer.eq_ignore_ascii_case("none") {
            debug!(answer, "delegation classification declined to hand off");
            return Ok(DelegationDecision::none());
        }

        let answer_lower = answer.to_lowercase();
        let matched = self
            .rules
            .iter()
            .find(|rule| answer_lower.contains(&rule.target_agent.to_lowercase()));

        Ok(match matched {
            Some(rule) => {
                debug!(target_agent = %rule.target_agent, "delegation matched a rule");
                DelegationDecision {
                    should_delegate: true,
                    target_agent: Some(rule.target_agent.clone()),
                    confidence: 1.0,
                }
            }
            None => {
                debug!(answer, "delegation classification matched no configured rule");
                DelegationDecision::none()
            }
        })
    }
}
