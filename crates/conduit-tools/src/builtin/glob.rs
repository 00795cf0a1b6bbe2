// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolResult};

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str { "Glob" }

    fn description(&self) -> &str {
        "Finds files matching a glob pattern (double-star supported, e.g. src/**/*.rs). \
         Results are sorted by modification time, newest first, one absolute path per line."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob pattern, e.g. '*.rs' or 'src/**/*.tsx'" },
                "path": { "type": "string", "description": "Root directory to search from (default '.')" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: &Value, _cancel: &CancellationToken) -> ToolResult {
        let Some(pattern) = input.get("pattern").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'pattern'");
        };
        let root = input.get("path").and_then(|v| v.as_str()).unwrap_or(".").to_string();

        debug!(pattern = %pattern, root = %root, "glob tool");

        let Some(regex) = glob_to_regex(pattern) else {
            return ToolResult::err(format!("invalid glob pattern: {pattern}"));
        };

        let mut matches: Vec<(std::path::PathBuf, std::time::SystemTime)> = Vec::new();
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            let base_name = entry.file_name().to_string_lossy().to_string();

            if regex.is_match(&rel_str) || regex.is_match(&base_name) {
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                let abs = std::fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf());
                matches.push((abs, mtime));
            }
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1));

        if matches.is_empty() {
            return ToolResult::ok("");
        }

        let lines: Vec<String> = matches.into_iter().map(|(p, _)| p.to_string_lossy().to_string()).collect();
        ToolResult::ok(lines.join("\n"))
    }
}

/// Convert a shell-style glob (`*`, `?`, `**`) into an anchored regex.
/// `**` matches across path separators; a lone `*` does not.
pub(crate) fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push_str(".*");
                i += 2;
                if chars.get(i) == Some(&'/') {
                    i += 1;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c if "\\.+()|[]{}^$".contains(c) => {
                out.push('\\');
                out.push(c);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
