//! Command-variant tool backend: spawns a process per invocation.
//!
//! Bounded by a single timeout, no retry — retries at this layer would
//! re-run side effects a tool call has no way to mark idempotent.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{EngineError, Result};
use crate::tools::ToolBackend;

/// Spawns `binary` with an argument template, substituting `{{input.field}}`
/// placeholders from the call's input map (see [`crate::tools::http::resolve_placeholders`]
/// for the shared substitution helper).
pub struct CommandTool {
    binary: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
}

impl CommandTool {
    pub fn new(binary: impl Into<String>, args: Vec<String>, env: HashMap<String, String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            args,
            env,
            timeout,
        }
    }
}

#[async_trait]
impl ToolBackend for CommandTool {
    async fn invoke(&self, input: &HashMap<String, serde_json::Value>) -> Result<String> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| super::http::resolve_placeholders(a, input))
            .collect();

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(|e| EngineError::ToolDispatchFailed {
            tool_name: self.binary.clone(),
            reason: format!("failed to spawn: {e}"),
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::ToolDispatchFailed {
                tool_name: self.binary.clone(),
                reason: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| EngineError::ToolDispatchFailed {
                tool_name: self.binary.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(EngineError::ToolDispatchFailed {
                tool_name: self.binary.clone(),
                reason: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
