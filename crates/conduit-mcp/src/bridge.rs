// SPDX-License-Identifier: MIT
//! Tiny conversions between `ask_user_question`'s wire shape and rmcp's MCP
//! model types.

use rmcp::model::{CallToolResult, Content, Tool as McpTool};
use std::borrow::Cow;
use std::sync::Arc;

/// The single tool descriptor this server advertises.
pub fn ask_user_question_tool() -> McpTool {
    let mut schema = serde_json::Map::new();
    schema.insert("type".to_string(), serde_json::json!("object"));
    schema.insert(
        "properties".to_string(),
        serde_json::json!({
            "question": { "type": "string", "description": "The question to ask the user" },
            "options": {
                "type": "array",
                "description": "Optional multiple-choice options",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["label"]
                }
            }
        }),
    );
    schema.insert("required".to_string(), serde_json::json!(["question"]));

    McpTool::new(
        Cow::Borrowed("ask_user_question"),
        Cow::Borrowed("Ask the user a free-form or multiple-choice question and wait for their answer."),
        Arc::new(schema),
    )
}

pub fn text_result(text: String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

pub fn error_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult { content: vec![Content::text(message.into())], is_error: Some(true), structured_content: None, meta: None }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
