// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolResult, ToolSchema};

/// Distinct error returned for a tool name with no registered implementation
/// — a `tool-not-found` condition, not an ordinary `ToolResult`.
#[derive(Debug, thiserror::Error)]
#[error("tool-not-found: {0}")]
pub struct ToolNotFound(pub String);

/// Maps tool name to implementation. Execution dispatch never blocks on
/// registry internals — lookups are a plain map read.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Execute `name` with `input`, or an `Err(ToolNotFound)` if unregistered
    /// — unknown tools are an execution error, not a `ToolResult`, per the
    /// executor's contract.
    pub async fn execute(
        &self,
        name: &str,
        input: &Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, ToolNotFound> {
        match self.tools.get(name) {
            Some(tool) => Ok(tool.execute(input, cancel).await),
            None => Err(ToolNotFound(name.to_string())),
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
