// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tool::{Tool, ToolResult};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str { "Write" }

    fn description(&self) -> &str {
        "Writes a file to the local filesystem, overwriting it if it exists. \
         Creates missing parent directories automatically. \
         ALWAYS prefer editing existing files with Edit; never write new files unless required."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute or relative path to the file" },
                "content": { "type": "string", "description": "Content to write to the file" }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, input: &Value, _cancel: &CancellationToken) -> ToolResult {
        let Some(path) = input.get("file_path").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'file_path'");
        };
        let Some(content) = input.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'content'");
        };

        debug!(path = %path, "write tool");

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResult::err(format!("failed to create parent directories: {e}"));
                }
            }
        }

        match tokio::fs::write(path, content).await {
            Ok(_) => {
                let mut result = ToolResult::ok(format!("wrote {} bytes to {path}", content.len()));
                result.file_path = Some(path.to_string());
                result.new_content = Some(content.to_string());
                result
            }
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
