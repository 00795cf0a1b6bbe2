// SPDX-License-Identifier: MIT
//! Vendor-metadata adapters (§4.5).
//!
//! Adding a new upstream agent is a matter of writing a new [`ToolUpdateAdapter`]
//! and inserting it into the chain built by [`default_chain`]; no other part
//! of the session changes.

use conduit_state::{diff_hunks, parse_unified_diff, PatchHunk};
use serde_json::Value;

/// A pre-formed tool response an adapter was able to extract from a
/// vendor-specific envelope, used to synthesize file-change records.
#[derive(Debug, Clone, Default)]
pub struct StructuredToolResponse {
    pub file_path: Option<String>,
    /// Full new file content, when the envelope carries it directly.
    pub content: Option<String>,
    /// For `Edit` updates that don't carry full content: the replacement pair
    /// used to reconstruct `content` from the prior state.
    pub old_string: Option<String>,
    pub new_string: Option<String>,
    /// Full pre-change file text, when the envelope happens to carry it
    /// (e.g. a diff block's `oldText`) — used as the file-change store's
    /// `original` on the first touch of a path.
    pub original_file: Option<String>,
}

/// Extracts tool identity and diff information from a vendor's
/// `session/update` envelope. The first adapter in the chain whose
/// `can_handle` returns true wins.
pub trait ToolUpdateAdapter: Send + Sync {
    fn adapter_name(&self) -> &str;
    fn can_handle(&self, update: &Value) -> bool;
    fn tool_name(&self, update: &Value) -> String;
    fn diff_hunks(&self, update: &Value) -> Vec<PatchHunk>;
    fn tool_response(&self, update: &Value) -> Option<StructuredToolResponse>;
}

/// Case-insensitive titles `"write"`/`"edit"` map to `Write`/`Edit`;
/// otherwise the title passes through unchanged; with no title, the kind
/// passes through unchanged.
pub fn canonical_tool_name(title: Option<&str>, kind: Option<&str>) -> String {
    if let Some(t) = title {
        match t.to_lowercase().as_str() {
            "write" => return "Write".to_string(),
            "edit" => return "Edit".to_string(),
            _ => return t.to_string(),
        }
    }
    kind.unwrap_or("other").to_string()
}

fn title_and_kind(update: &Value) -> (Option<&str>, Option<&str>) {
    (update.get("title").and_then(|v| v.as_str()), update.get("kind").and_then(|v| v.as_str()))
}

/// Keyed to the `meta.claude-code` envelope: a pre-formed tool response
/// carried alongside the update, so no reconstruction is needed.
pub struct ClaudeCodeAdapter;

impl ToolUpdateAdapter for ClaudeCodeAdapter {
    fn adapter_name(&self) -> &str {
        "claude-code"
    }

    fn can_handle(&self, update: &Value) -> bool {
        update.get("meta").and_then(|m| m.get("claude-code")).is_some()
    }

    fn tool_name(&self, update: &Value) -> String {
        let (title, kind) = title_and_kind(update);
        canonical_tool_name(title, kind)
    }

    fn diff_hunks(&self, update: &Value) -> Vec<PatchHunk> {
        update
            .get("meta")
            .and_then(|m| m.get("claude-code"))
            .and_then(|c| c.get("toolResponse"))
            .and_then(|r| r.get("diffMetadata"))
            .and_then(|v| v.as_str())
            .map(parse_unified_diff)
            .unwrap_or_default()
    }

    fn tool_response(&self, update: &Value) -> Option<StructuredToolResponse> {
        let response = update.get("meta")?.get("claude-code")?.get("toolResponse")?;
        Some(StructuredToolResponse {
            file_path: response.get("filePath").and_then(|v| v.as_str()).map(str::to_string),
            content: response.get("content").and_then(|v| v.as_str()).map(str::to_string),
            old_string: response.get("oldString").and_then(|v| v.as_str()).map(str::to_string),
            new_string: response.get("newString").and_then(|v| v.as_str()).map(str::to_string),
            original_file: response.get("originalFile").and_then(|v| v.as_str()).map(str::to_string),
        })
    }
}

/// Fallback adapter for any agent that doesn't attach vendor metadata:
/// parses JSON diff blocks out of the update's `content` array, and
/// unified-diff text out of a plain `metadata` field.
pub struct GenericAdapter;

impl GenericAdapter {
    fn diff_block<'a>(&self, update: &'a Value) -> Option<&'a Value> {
        update.get("content")?.as_array()?.iter().find(|block| block.get("type").and_then(|t| t.as_str()) == Some("diff"))
    }
}

impl ToolUpdateAdapter for GenericAdapter {
    fn adapter_name(&self) -> &str {
        "generic"
    }

    fn can_handle(&self, _update: &Value) -> bool {
        true
    }

    fn tool_name(&self, update: &Value) -> String {
        let (title, kind) = title_and_kind(update);
        canonical_tool_name(title, kind)
    }

    fn diff_hunks(&self, update: &Value) -> Vec<PatchHunk> {
        if let Some(block) = self.diff_block(update) {
            let old = block.get("oldText").and_then(|v| v.as_str()).unwrap_or("");
            let new = block.get("newText").and_then(|v| v.as_str()).unwrap_or("");
            return diff_hunks(old, new, 3);
        }
        update
            .get("metadata")
            .and_then(|v| v.as_str())
            .map(parse_unified_diff)
            .unwrap_or_default()
    }

    fn tool_response(&self, update: &Value) -> Option<StructuredToolResponse> {
        let block = self.diff_block(update)?;
        Some(StructuredToolResponse {
            file_path: block.get("path").and_then(|v| v.as_str()).map(str::to_string),
            content: block.get("newText").and_then(|v| v.as_str()).map(str::to_string),
            old_string: None,
            new_string: None,
            original_file: block.get("oldText").and_then(|v| v.as_str()).map(str::to_string),
        })
    }
}

/// The default chain: vendor-specific adapters first, generic last.
pub fn default_chain() -> Vec<Box<dyn ToolUpdateAdapter>> {
    vec![Box::new(ClaudeCodeAdapter), Box::new(GenericAdapter)]
}

/// Run the chain and return the first matching adapter's extraction.
pub fn resolve<'a>(
    chain: &'a [Box<dyn ToolUpdateAdapter>],
    update: &Value,
) -> &'a dyn ToolUpdateAdapter {
    for adapter in chain {
        if adapter.can_handle(update) {
            return adapter.as_ref();
        }
    }
    // GenericAdapter::can_handle always returns true, so a well-formed chain
    // never reaches here; fall back to the last entry defensively.
    chain.last().expect("adapter chain must not be empty").as_ref()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_tool_name_maps_write_and_edit_case_insensitively() {
        assert_eq!(canonical_tool_name(Some("Write"), None), "Write");
        assert_eq!(canonical_tool_name(Some("edit"), None), "Edit");
        assert_eq!(canonical_tool_name(Some("Bash"), None), "Bash");
        assert_eq!(canonical_tool_name(None, Some("search")), "search");
    }

    #[test]
    fn claude_code_adapter_claims_updates_with_its_envelope() {
        let update = json!({ "meta": { "claude-code": { "toolResponse": {} } } });
        assert!(ClaudeCodeAdapter.can_handle(&update));
        assert!(GenericAdapter.can_handle(&json!({}))); // generic always claims
    }

    #[test]
    fn claude_code_adapter_extracts_preformed_tool_response() {
        let update = json!({
            "title": "Write",
            "meta": { "claude-code": { "toolResponse": { "filePath": "/a.txt", "content": "new" } } }
        });
        let resp = ClaudeCodeAdapter.tool_response(&update).unwrap();
        assert_eq!(resp.file_path.as_deref(), Some("/a.txt"));
        assert_eq!(resp.content.as_deref(), Some("new"));
    }

    #[test]
    fn generic_adapter_parses_diff_block_from_content() {
        let update = json!({
            "title": "Edit",
            "content": [{ "type": "diff", "path": "/b.txt", "oldText": "a\n", "newText": "b\n" }]
        });
        assert!(GenericAdapter.can_handle(&update));
        let resp = GenericAdapter.tool_response(&update).unwrap();
        assert_eq!(resp.file_path.as_deref(), Some("/b.txt"));
        assert_eq!(resp.content.as_deref(), Some("b\n"));
        assert!(!GenericAdapter.diff_hunks(&update).is_empty());
    }

    #[test]
    fn resolve_prefers_claude_code_over_generic() {
        let chain = default_chain();
        let update = json!({ "meta": { "claude-code": { "toolResponse": {} } } });
        assert_eq!(resolve(&chain, &update).adapter_name(), "claude-code");
        let plain = json!({ "title": "Read" });
        assert_eq!(resolve(&chain, &plain).adapter_name(), "generic");
    }
}
