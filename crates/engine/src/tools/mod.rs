//! Tool registry and concurrent executor: dispatches a batch of tool calls
//! concurrently while preserving call order in the returned results.

pub mod command;
pub mod http;
pub mod inline;
pub mod mcp;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::llm::types::{ToolCall, ToolDefinition, ToolResult};

/// A single tool's dispatch backend. Validation and not-found handling live
/// in [`ToolRegistry`]; a backend only needs to know how to run one call.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn invoke(&self, input: &HashMap<String, serde_json::Value>) -> Result<String>;
}

/// The contract every strategy dispatches tool calls through.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run a single tool call. Errors here are dispatch-level (unknown tool,
    /// schema violation) — ordinary backend failures are still `Ok` text
    /// describing the failure, mirroring the host tool's own error channel.
    async fn execute(&self, call: &ToolCall) -> Result<String>;

    /// Run every call concurrently, returning results in the *same order*
    /// as `calls` regardless of completion order. A failed call becomes
    /// `ToolResult { is_error: true, .. }` rather than shrinking the output.
    async fn execute_concurrent(
        &self,
        ctx: CancellationToken,
        calls: Vec<ToolCall>,
    ) -> Vec<ToolResult> {
        default_execute_concurrent(self, ctx, calls).await
    }

    /// Tool contracts to surface to the model, if this executor exposes any.
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

/// Shared concurrent-dispatch implementation: one task per call, writing
/// into a pre-sized slice at the call's own index so ordering is a
/// structural guarantee rather than a post-hoc sort.
async fn default_execute_concurrent<E: ToolExecutor + ?Sized>(
    executor: &E,
    ctx: CancellationToken,
    calls: Vec<ToolCall>,
) -> Vec<ToolResult> {
    let mut results: Vec<Option<ToolResult>> = (0..calls.len()).map(|_| None).collect();

    // `ToolExecutor` isn't `Clone`, and a borrowed `&self` can't cross a
    // `tokio::spawn` boundary, so calls are dispatched on the current task
    // and polled concurrently via `join_all` rather than spawned.
    let futures = calls.into_iter().enumerate().map(|(i, call)| {
        let ctx = ctx.clone();
        async move {
            if ctx.is_cancelled() {
                return (
                    i,
                    ToolResult {
                        tool_use_id: call.id,
                        content: "operation cancelled".into(),
                        is_error: true,
                    },
                );
            }
            debug!(tool = %call.name, call_id = %call.id, "dispatching tool call");
            let result = tokio::select! {
                r = executor.execute(&call) => r,
                _ = ctx.cancelled() => Err(EngineError::Cancelled),
            };
            let tool_result = match result {
                Ok(content) => {
                    debug!(tool = %call.name, call_id = %call.id, "tool call completed");
                    ToolResult {
                        tool_use_id: call.id,
                        content,
                        is_error: false,
                    }
                }
                Err(e) => {
                    warn!(tool = %call.name, call_id = %call.id, error = %e, "tool call failed");
                    ToolResult {
                        tool_use_id: call.id,
                        content: e.to_string(),
                        is_error: true,
                    }
                }
            };
            (i, tool_result)
        }
    });

    for (i, result) in futures::future::join_all(futures).await {
        results[i] = Some(result);
    }

    results.into_iter().map(|r| r.expect("every index written")).collect()
}

/// A [`ToolExecutor`] backed by a static map of name → (definition, backend).
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, Arc<dyn ToolBackend>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, definition: ToolDefinition, backend: Arc<dyn ToolBackend>) {
        self.tools.insert(definition.name.clone(), (definition, backend));
    }

    fn validate(&self, definition: &ToolDefinition, input: &HashMap<String, serde_json::Value>) -> Result<()> {
        let Some(required) = definition.input_schema.get("required").and_then(|r| r.as_array()) else {
            return Ok(());
        };
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if !input.contains_key(name) {
                return Err(EngineError::ToolDispatchFailed {
                    tool_name: definition.name.clone(),
                    reason: format!("missing required field `{name}`"),
                });
            }
        }
        Ok(())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, call: &ToolCall) -> Result<String> {
        let (definition, backend) =
            self.tools.get(&call.name).ok_or_else(|| EngineError::UnknownTool {
                tool_name: call.name.clone(),
            })?;
        self.validate(definition, &call.input)?;
        backend.invoke(&call.input).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|(d, _)| d.clone()).collect()
    }
}
