//! Inline-variant tool backend: executes embedded logic in-process under a
//! time and output-size cap.
//!
//! A real WASM plugin host is out of scope here; "embedded code" is
//! represented as a boxed async closure registered at construction — this
//! crate supplies the cap enforcement, a host supplies the closure.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::tools::ToolBackend;

type InlineFn = Arc<
    dyn Fn(HashMap<String, serde_json::Value>) -> Pin<Box<dyn Future<Output = Result<String>> + Send>>
        + Send
        + Sync,
>;

/// Runs a registered closure with a wall-clock timeout and a cap on output
/// size — the two limits actually enforceable without a real interpreter.
pub struct InlineTool {
    handler: InlineFn,
    timeout: Duration,
    max_output_bytes: usize,
}

impl InlineTool {
    pub fn new<F, Fut>(handler: F, timeout: Duration, max_output_bytes: usize) -> Self
    where
        F: Fn(HashMap<String, serde_json::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |input| Box::pin(handler(input))),
            timeout,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl ToolBackend for InlineTool {
    async fn invoke(&self, input: &HashMap<String, serde_json::Value>) -> Result<String> {
        let handler = self.handler.clone();
        let input = input.clone();

        let output = tokio::time::timeout(self.timeout, handler(input))
            .await
            .map_err(|_| EngineError::ToolDispatchFailed {
                tool_name: "inline".into(),
                reason: format!("timed out after {:?}", self.timeout),
            })??;

        if output.len() > self.max_output_bytes {
            return Err(EngineError::ToolDispatchFailed {
                tool_name: "inline".into(),
                reason: format!(
                    "output exceeded cap of {} bytes ({} produced)",
                    self.max_output_bytes,
                    output.len()
                ),
            });
        }

        Ok(output)
    }
}
