// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use conduit_state::PatchHunk;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Uniform result produced by every tool execution.
///
/// `file_path`/`old_content`/`new_content`/`hunks` are populated only by
/// file-touching tools (`Write`, `Edit`) so the caller can feed them straight
/// into the file-change store.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
    pub file_path: Option<String>,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub hunks: Vec<PatchHunk>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Default::default() }
    }

    pub fn err(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: true, ..Default::default() }
    }
}

/// A single named tool with a uniform input/result contract.
///
/// Execution never panics: invalid input, OS errors, and cancellation are all
/// reported through `ToolResult::is_error`, never through a `Result::Err` —
/// the caller always has a tool result to feed back to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    /// Execute with `input` and an externally supplied cancellation token.
    /// `cancel` firing before the tool finishes means "abandon the work and
    /// return a cancellation error" — used to thread a session's `Cancel`
    /// into a running `Bash` subprocess.
    async fn execute(&self, input: &Value, cancel: &CancellationToken) -> ToolResult;
}

/// Schema exposed by the registry for building a model's tool catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}
