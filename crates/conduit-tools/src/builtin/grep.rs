// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use crate::builtin::glob::glob_to_regex;
use crate::tool::{Tool, ToolResult};

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str { "Grep" }

    fn description(&self) -> &str {
        "Searches file contents with a regular expression. output_mode is one of \
         files_with_matches (default), content, count. Supports -i (case-insensitive), \
         -A/-B/-C context lines, glob file filtering, and head_limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression to search for" },
                "path": { "type": "string", "description": "File or directory to search (default '.')" },
                "glob": { "type": "string", "description": "Glob filter applied to candidate files" },
                "output_mode": { "type": "string", "enum": ["files_with_matches", "content", "count"] },
                "-i": { "type": "boolean", "description": "Case-insensitive match" },
                "-A": { "type": "integer", "description": "Lines of context after each match" },
                "-B": { "type": "integer", "description": "Lines of context before each match" },
                "-C": { "type": "integer", "description": "Lines of context before and after each match" },
                "head_limit": { "type": "integer", "description": "Maximum number of result entries" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: &Value, _cancel: &CancellationToken) -> ToolResult {
        let Some(pattern) = input.get("pattern").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'pattern'");
        };
        let root = input.get("path").and_then(|v| v.as_str()).unwrap_or(".").to_string();
        let glob = input.get("glob").and_then(|v| v.as_str());
        let output_mode = input.get("output_mode").and_then(|v| v.as_str()).unwrap_or("files_with_matches");
        let case_insensitive = input.get("-i").and_then(|v| v.as_bool()).unwrap_or(false);
        let context_c = input.get("-C").and_then(|v| v.as_u64()).map(|v| v as usize);
        let before = context_c.or_else(|| input.get("-B").and_then(|v| v.as_u64()).map(|v| v as usize)).unwrap_or(0);
        let after = context_c.or_else(|| input.get("-A").and_then(|v| v.as_u64()).map(|v| v as usize)).unwrap_or(0);
        let head_limit = input.get("head_limit").and_then(|v| v.as_u64()).map(|v| v as usize);

        debug!(pattern = %pattern, root = %root, output_mode = %output_mode, "grep tool");

        let regex = match RegexBuilder::new(pattern).case_insensitive(case_insensitive).build() {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("invalid pattern: {e}")),
        };
        let glob_regex = glob.and_then(glob_to_regex);

        let files = collect_candidate_files(&root, glob_regex.as_ref());

        let mut files_with_matches = Vec::new();
        let mut content_blocks: Vec<String> = Vec::new();
        let mut total_count: usize = 0;

        for path in files {
            let Ok(bytes) = std::fs::read(&path) else { continue };
            if bytes[..bytes.len().min(8000)].contains(&0u8) {
                continue; // binary file
            }
            let Ok(text) = String::from_utf8(bytes) else { continue };
            let lines: Vec<&str> = text.lines().collect();

            let match_lines: Vec<usize> = lines
                .iter()
                .enumerate()
                .filter(|(_, l)| regex.is_match(l))
                .map(|(i, _)| i)
                .collect();

            if match_lines.is_empty() {
                continue;
            }

            total_count += match_lines.len();
            files_with_matches.push(path.to_string_lossy().to_string());

            if output_mode == "content" {
                let mut block = format!("{}:\n", path.display());
                let mut shown = std::collections::BTreeSet::new();
                for &m in &match_lines {
                    let lo = m.saturating_sub(before);
                    let hi = (m + after).min(lines.len().saturating_sub(1));
                    for i in lo..=hi {
                        shown.insert(i);
                    }
                }
                for i in shown {
                    block.push_str(&format!("{}:{}\n", i + 1, lines[i]));
                }
                content_blocks.push(block);
            }

            if let Some(limit) = head_limit {
                if files_with_matches.len() >= limit {
                    break;
                }
            }
        }

        match output_mode {
            "count" => ToolResult::ok(total_count.to_string()),
            "content" => ToolResult::ok(content_blocks.join("\n")),
            _ => ToolResult::ok(files_with_matches.join("\n")),
        }
    }
}

fn collect_candidate_files(root: &str, glob: Option<&regex::Regex>) -> Vec<std::path::PathBuf> {
    let root_path = Path::new(root);
    if root_path.is_file() {
        return vec![root_path.to_path_buf()];
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            glob.map(|g| {
                let name = e.file_name().to_string_lossy().to_string();
                g.is_match(&name)
            })
            .unwrap_or(true)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("conduit_grep_test_{name}_{}.txt", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn files_with_matches_is_the_default_mode() {
        let path = tmp_file("default", "hello world\n");
        let out = GrepTool
            .execute(&json!({"pattern": "hello", "path": path.to_string_lossy()}), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains(&*path.to_string_lossy()));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn content_mode_includes_line_numbers_and_header() {
        let path = tmp_file("content", "alpha\nbeta match\ngamma\n");
        let out = GrepTool
            .execute(&json!({"pattern": "match", "path": path.to_string_lossy(), "output_mode": "content"}), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("2:beta match"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn count_mode_returns_integer() {
        let path = tmp_file("count", "a\na\nb\na\n");
        let out = GrepTool
            .execute(&json!({"pattern": "a", "path": path.to_string_lossy(), "output_mode": "count"}), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "3");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn case_insensitive_flag() {
        let path = tmp_file("ci", "Hello World\n");
        let out = GrepTool
            .execute(&json!({"pattern": "hello", "path": path.to_string_lossy(), "-i": true}), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains(&*path.to_string_lossy()));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn context_lines_are_merged_around_match() {
        let path = tmp_file("ctx", "one\ntwo\nthree MATCH\nfour\nfive\n");
        let out = GrepTool
            .execute(&json!({"pattern": "MATCH", "path": path.to_string_lossy(), "output_mode": "content", "-C": 1}), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("2:two"));
        assert!(out.content.contains("3:three MATCH"));
        assert!(out.content.contains("4:four"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn binary_file_is_skipped() {
        let path = std::env::temp_dir().join(format!("conduit_grep_binary_{}.bin", std::process::id()));
        std::fs::write(&path, [0u8, 1, 2, b'a', b'b', b'c']).unwrap();
        let out = GrepTool
            .execute(&json!({"pattern": "abc", "path": path.to_string_lossy()}), &CancellationToken::new())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_pattern_is_error() {
        let out = GrepTool.execute(&json!({}), &CancellationToken::new()).await;
        assert!(out.is_error);
    }
}
