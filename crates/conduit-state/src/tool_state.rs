// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::PatchHunk;

/// Status of a tool call. Transitions form a DAG and never move backward:
/// `Pending -> AwaitingPermission? -> Running -> {Completed, Error, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    AwaitingPermission,
    Running,
    Completed,
    Error,
    Cancelled,
}

/// A permission option offered to the user while a tool call is
/// `AwaitingPermission` (`allow_once`, `allow_always`, `reject_once`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOption {
    pub option_id: String,
    pub name: String,
    pub kind: String,
}

/// A hint describing what a tool call does, used by the presentation layer
/// to pick an icon/verb — not load-bearing for any invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Edit,
    Delete,
    Move,
    Search,
    Execute,
    Think,
    Fetch,
    Other,
}

/// The full state tracked for one tool call, keyed by its opaque id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallState {
    pub id: String,
    pub status: ToolCallStatus,
    pub title: String,
    pub kind: ToolKind,
    /// Canonical tool name: `Read`/`Write`/`Edit`/`Bash`/`Glob`/`Grep`/`Task`/...
    pub canonical_name: String,
    pub parent_id: Option<String>,
    pub raw_input: Value,
    pub output: Vec<String>,
    pub diff: Option<Vec<PatchHunk>>,
    pub permission_options: Vec<PermissionOption>,
}

impl ToolCallState {
    pub fn new(id: impl Into<String>, title: impl Into<String>, canonical_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ToolCallStatus::Pending,
            title: title.into(),
            kind: ToolKind::Other,
            canonical_name: canonical_name.into(),
            parent_id: None,
            raw_input: Value::Null,
            output: Vec::new(),
            diff: None,
            permission_options: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, ToolCallState>,
    parent_stack: Vec<String>,
}

/// Thread-safe, keyed registry of tool-call state plus a per-session parent
/// stack for `Task` sub-agent nesting. Callers need no external locking.
#[derive(Default)]
pub struct ToolStateStore {
    inner: Mutex<Inner>,
}

impl ToolStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ToolCallState> {
        self.inner.lock().unwrap().states.get(id).cloned()
    }

    pub fn set(&self, state: ToolCallState) {
        self.inner.lock().unwrap().states.insert(state.id.clone(), state);
    }

    /// Apply `f` to the state for `id` under the lock, returning the mutated
    /// state, or `None` if no state exists for `id`.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut ToolCallState)) -> Option<ToolCallState> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.states.get_mut(id)?;
        f(state);
        Some(state.clone())
    }

    pub fn push_parent(&self, id: impl Into<String>) {
        self.inner.lock().unwrap().parent_stack.push(id.into());
    }

    /// Remove `id` wherever it sits in the stack — not necessarily the top,
    /// because sub-agent terminations may arrive out of order.
    pub fn pop_parent(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.parent_stack.iter().rposition(|x| x == id) {
            inner.parent_stack.remove(pos);
        }
    }

    pub fn current_parent(&self) -> Option<String> {
        self.inner.lock().unwrap().parent_stack.last().cloned()
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = ToolStateStore::new();
        store.set(ToolCallState::new("t1", "Read", "Read"));
        let got = store.get("t1").unwrap();
        assert_eq!(got.status, ToolCallStatus::Pending);
    }

    #[test]
    fn get_missing_is_none() {
        let store = ToolStateStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn update_mutates_in_place_and_returns_clone() {
        let store = ToolStateStore::new();
        store.set(ToolCallState::new("t1", "Bash", "Bash"));
        let updated = store.update("t1", |s| s.status = ToolCallStatus::Running).unwrap();
        assert_eq!(updated.status, ToolCallStatus::Running);
        assert_eq!(store.get("t1").unwrap().status, ToolCallStatus::Running);
    }

    #[test]
    fn update_missing_returns_none() {
        let store = ToolStateStore::new();
        assert!(store.update("nope", |s| s.status = ToolCallStatus::Running).is_none());
    }

    #[test]
    fn parent_stack_push_pop_by_value() {
        let store = ToolStateStore::new();
        store.push_parent("a");
        store.push_parent("b");
        store.push_parent("c");
        assert_eq!(store.current_parent(), Some("c".to_string()));

        // Out-of-order termination: "b" finishes before "c".
        store.pop_parent("b");
        assert_eq!(store.current_parent(), Some("c".to_string()));

        store.pop_parent("c");
        assert_eq!(store.current_parent(), Some("a".to_string()));
    }

    #[test]
    fn pop_parent_missing_is_noop() {
        let store = ToolStateStore::new();
        store.push_parent("a");
        store.pop_parent("nonexistent");
        assert_eq!(store.current_parent(), Some("a".to_string()));
    }

    #[test]
    fn status_ordering_matches_spec_partial_order() {
        assert!(ToolCallStatus::Pending < ToolCallStatus::AwaitingPermission);
        assert!(ToolCallStatus::AwaitingPermission < ToolCallStatus::Running);
        assert!(ToolCallStatus::Running < ToolCallStatus::Completed);
    }
}
