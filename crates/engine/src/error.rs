//! Engine error types.
//!
//! All engine subsystems surface errors through [`EngineError`]. Tool-level
//! and budget-exhaustion failures are deliberately *not* represented here —
//! per the strategy contract they are recovered locally and folded into a
//! successful [`crate::strategies::Response`] instead of propagated.

/// Unified error type for the agent execution engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- Provider errors ------------------------------------------------------
    /// A request to the LLM provider failed (transport or non-2xx response).
    #[error("provider: {reason}")]
    Provider { reason: String },

    /// The provider response could not be parsed into the expected shape.
    #[error("provider response parse error: {reason}")]
    ProviderParseFailed { reason: String },

    /// The streaming connection was interrupted or produced invalid data.
    #[error("provider stream error: {reason}")]
    StreamError { reason: String },

    /// No API key is configured for the selected provider.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Tool errors ------------------------------------------------------
    /// A tool call referenced a name not present in the executor's registry.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// Raised by a `ToolBackend` when dispatch itself cannot proceed (e.g. a
    /// malformed backend configuration). Ordinary tool failures are captured
    /// as `ToolResult { is_error: true, .. }`, never this variant.
    #[error("tool dispatch failed for `{tool_name}`: {reason}")]
    ToolDispatchFailed { tool_name: String, reason: String },

    // -- Strategy / planning errors --------------------------------------
    /// A strategy could not complete its turn (distinct from a graceful
    /// budget stop, which is reported on `Response.error` instead).
    #[error("strategy `{strategy}` failed at turn {turn}: {reason}")]
    StrategyFailed {
        strategy: String,
        turn: u32,
        reason: String,
    },

    /// Plan-and-Execute could not parse a usable plan from the model output.
    #[error("planning failed: {reason}")]
    PlanningFailed { reason: String },

    // -- Delegation / routing ----------------------------------------------
    /// The delegation classifier call itself failed (not "no match").
    #[error("delegation classification failed: {reason}")]
    DelegationFailed { reason: String },

    // -- Pipeline errors ------------------------------------------------------
    /// A pipeline definition referenced a step name that does not exist.
    #[error("pipeline step `{step}` depends on unknown step `{dependency}`")]
    UnknownPipelineStep { step: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("pipeline contains a dependency cycle involving step `{step}`")]
    PipelineCycle { step: String },

    /// Two steps share an output key, or a step's output key is empty.
    #[error("pipeline step `{step}` has a duplicate or empty output key `{output}`")]
    DuplicatePipelineOutput { step: String, output: String },

    /// A pipeline step failed; the DAG is cancelled.
    #[error("pipeline step `{step}` failed: {source}")]
    PipelineStepFailed {
        step: String,
        #[source]
        source: Box<EngineError>,
    },

    // -- Cancellation ---------------------------------------------------------
    /// The caller's cancellation token was triggered before completion.
    #[error("operation cancelled")]
    Cancelled,

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors. Prefer a typed variant
    /// whenever possible.
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider {
            reason: err.to_string(),
        }
    }
}
