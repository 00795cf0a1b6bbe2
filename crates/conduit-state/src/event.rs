// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::file_change::FileChange;
use crate::tool_state::{PermissionOption, ToolCallState};

/// Priority of a [`PlanEntry`], as surfaced by an agent's plan update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPriority {
    High,
    Medium,
    Low,
}

/// Status of a [`PlanEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryStatus {
    Pending,
    InProgress,
    Completed,
}

/// One item of an agent's plan, as described in the GLOSSARY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    pub content: String,
    pub priority: PlanPriority,
    pub status: PlanEntryStatus,
}

/// Opaque payload describing a pending permission request, carried by
/// [`Event::PermissionRequest`]. The presentation layer renders this and
/// eventually answers through the permission layer or supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequestPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    pub options: Vec<PermissionOption>,
}

/// The tagged union of everything a session can emit (§3 Event).
///
/// Produced by a session task (ACP or direct-API) and delivered, in order,
/// through that session's bounded event sink. The supervisor's bridge
/// translates each variant into a presentation-layer event named
/// `session:<id>:<topic>` (§4.7) without reordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A chunk of assistant-visible text.
    MessageChunk(String),
    /// A chunk of the model's extended-thinking/reasoning text.
    ThoughtChunk(String),
    /// A snapshot of a tool call's current state.
    ToolState(ToolCallState),
    /// The session's current mode changed.
    ModeChanged(String),
    /// The set of modes an ACP agent makes available changed or was first reported.
    ModesAvailable(Vec<String>),
    /// An ordered plan update.
    PlanUpdate(Vec<PlanEntry>),
    /// The agent is requesting permission to run a tool.
    PermissionRequest(PermissionRequestPayload),
    /// The current prompt turn finished, carrying the stop reason
    /// (`end_turn`, `tool_use`, `max_tokens`, `cancelled`, ...).
    PromptComplete { stop_reason: String },
    /// The session's accumulated file changes, recomputed after a mutation.
    FileChangesUpdated(Vec<FileChange>),
    /// A recoverable error surfaced to the presentation layer.
    Error(String),
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_as_tagged_enum() {
        let ev = Event::MessageChunk("hi".into());
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("MessageChunk").is_some());
    }

    #[test]
    fn plan_entry_round_trips() {
        let entry = PlanEntry {
            content: "write tests".into(),
            priority: PlanPriority::High,
            status: PlanEntryStatus::InProgress,
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: PlanEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "write tests");
        assert_eq!(back.status, PlanEntryStatus::InProgress);
    }
}
