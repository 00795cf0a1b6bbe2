// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolResult};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str { "Read" }

    fn description(&self) -> &str {
        "Reads a file from the local filesystem. 'file_path' must be an absolute path. \
         Returns a cat -n style rendering (line number, tab, text) of the selected lines. \
         Use 'offset' (1-indexed) and 'limit' to page through large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Absolute path to the file" },
                "offset": { "type": "integer", "description": "1-indexed line to start reading from" },
                "limit": { "type": "integer", "description": "Maximum number of lines to read" }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, input: &Value, _cancel: &CancellationToken) -> ToolResult {
        let Some(path) = input.get("file_path").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'file_path'");
        };
        let offset = input.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = input.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        if contents.is_empty() {
            return ToolResult::ok("");
        }

        let lines: Vec<&str> = contents.lines().collect();
        if offset > lines.len() {
            return ToolResult::ok("");
        }

        let start = offset - 1;
        let end = match limit {
            Some(l) => (start + l).min(lines.len()),
            None => lines.len(),
        };

        // `str::lines()` already strips the file's own trailing newline, so
        // no synthetic blank final line ever appears here.
        let rendered: Vec<String> = lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}\t{}", start + i + 1, line))
            .collect();

        ToolResult::ok(rendered.join("\n"))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
