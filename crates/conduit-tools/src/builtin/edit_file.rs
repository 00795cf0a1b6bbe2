// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use conduit_state::diff_hunks;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::tool::{Tool, ToolResult};

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str { "Edit" }

    fn description(&self) -> &str {
        "Replaces an exact, unique occurrence of 'old_string' with 'new_string' in a file. \
         'old_string' must be non-empty and must match exactly once unless replace_all is set. \
         Fails rather than guessing when the match is ambiguous."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "old_string": { "type": "string", "description": "Exact text to replace; must be non-empty" },
                "new_string": { "type": "string", "description": "Replacement text; may be empty" },
                "replace_all": { "type": "boolean", "description": "Replace every occurrence instead of requiring uniqueness (default false)" }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, input: &Value, _cancel: &CancellationToken) -> ToolResult {
        let Some(path) = input.get("file_path").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'file_path'");
        };
        let Some(old_string) = input.get("old_string").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'old_string'");
        };
        let Some(new_string) = input.get("new_string").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'new_string'");
        };
        let replace_all = input.get("replace_all").and_then(|v| v.as_bool()).unwrap_or(false);

        if old_string.is_empty() {
            return ToolResult::err("old_string must be non-empty");
        }
        if old_string == new_string {
            return ToolResult::err("old_string and new_string are identical — nothing to do");
        }

        let original = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let count = original.matches(old_string).count();
        if count == 0 {
            return ToolResult::err(format!("old_string not found in {path}"));
        }
        if count > 1 && !replace_all {
            return ToolResult::err(format!(
                "old_string is not unique in {path}: found {count} occurrences; \
                 pass replace_all=true or narrow old_string with more context"
            ));
        }

        let new_content = if replace_all {
            original.replace(old_string, new_string)
        } else {
            original.replacen(old_string, new_string, 1)
        };

        if let Err(e) = tokio::fs::write(path, &new_content).await {
            return ToolResult::err(e.to_string());
        }

        let hunks = diff_hunks(&original, &new_content, 3);
        let mut result = ToolResult::ok(format!("edited {path}"));
        result.file_path = Some(path.to_string());
        result.old_content = Some(original);
        result.new_content = Some(new_content);
        result.hunks = hunks;
        result
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tmp_path() -> String {
        static CTR: AtomicU32 = AtomicU32::new(0);
        let n = CTR.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir()
            .join(format!("conduit_edit_test_{}_{n}.txt", std::process::id()))
            .to_string_lossy()
            .to_string()
    }

    #[tokio::test]
    async fn uniqueness_guard_rejects_ambiguous_match() {
        // S7: "foo bar foo baz foo" has 3 occurrences of "foo".
        let path = tmp_path();
        std::fs::write(&path, "foo bar foo baz foo\n").unwrap();
        let cancel = CancellationToken::new();
        let out = EditFileTool
            .execute(&json!({"file_path": path, "old_string": "foo", "new_string": "qux"}), &cancel)
            .await;
        assert!(out.is_error);
        assert!(out.content.contains('3'));
        assert!(out.content.to_lowercase().contains("unique"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "foo bar foo baz foo\n");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn replace_all_handles_multiple_occurrences() {
        let path = tmp_path();
        std::fs::write(&path, "foo foo foo\n").unwrap();
        let cancel = CancellationToken::new();
        let out = EditFileTool
            .execute(&json!({"file_path": path, "old_string": "foo", "new_string": "bar", "replace_all": true}), &cancel)
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "bar bar bar\n");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn zero_occurrences_is_error() {
        let path = tmp_path();
        std::fs::write(&path, "nothing here\n").unwrap();
        let cancel = CancellationToken::new();
        let out = EditFileTool
            .execute(&json!({"file_path": path, "old_string": "missing", "new_string": "x"}), &cancel)
            .await;
        assert!(out.is_error);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn identical_strings_is_error() {
        let path = tmp_path();
        std::fs::write(&path, "same\n").unwrap();
        let cancel = CancellationToken::new();
        let out = EditFileTool
            .execute(&json!({"file_path": path, "old_string": "same", "new_string": "same"}), &cancel)
            .await;
        assert!(out.is_error);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn successful_edit_returns_old_and_new_content_with_hunks() {
        let path = tmp_path();
        std::fs::write(&path, "hello world\n").unwrap();
        let cancel = CancellationToken::new();
        let out = EditFileTool
            .execute(&json!({"file_path": path, "old_string": "world", "new_string": "gopher"}), &cancel)
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.old_content.as_deref(), Some("hello world\n"));
        assert_eq!(out.new_content.as_deref(), Some("hello gopher\n"));
        assert!(!out.hunks.is_empty());
        let _ = std::fs::remove_file(&path);
    }
}
