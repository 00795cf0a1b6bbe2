// SPDX-License-Identifier: MIT
//! The permission layer: a deterministic tool-name classifier plus a
//! request/response rendezvous for "ask" decisions, decoupled from any UI.
//!
//! Entirely transport-agnostic: callers hand in an [`PermissionEventSink`]
//! collaborator so the presentation layer can be swapped without touching
//! this crate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub use conduit_state::PermissionOption;

/// A decision for a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    Allow,
    Ask,
    Deny,
}

/// Collaborator the permission layer emits events through. The presentation
/// layer (or a test harness) implements this; the layer never depends on a
/// concrete transport.
#[async_trait]
pub trait PermissionEventSink: Send + Sync {
    async fn emit_permission_request(&self, tool_call_id: &str, tool_name: &str, options: &[PermissionOption]);
}

/// A sink that drops every event — useful for tests and headless callers
/// that poll state instead of observing events.
pub struct NullEventSink;

#[async_trait]
impl PermissionEventSink for NullEventSink {
    async fn emit_permission_request(&self, _tool_call_id: &str, _tool_name: &str, _options: &[PermissionOption]) {}
}

/// Default rule table: `Read`/`Glob`/`Grep`/`WebSearch`/`WebFetch` -> Allow;
/// `Write`/`Edit`/`NotebookEdit`/`Bash` -> Ask; anything else -> Deny
/// (enforced by the lookup-miss default in [`PermissionLayer::check`]).
pub fn default_rules() -> HashMap<String, ApprovalPolicy> {
    let mut rules = HashMap::new();
    for name in ["Read", "Glob", "Grep", "WebSearch", "WebFetch"] {
        rules.insert(name.to_string(), ApprovalPolicy::Allow);
    }
    for name in ["Write", "Edit", "NotebookEdit", "Bash"] {
        rules.insert(name.to_string(), ApprovalPolicy::Ask);
    }
    rules
}

struct Inner {
    rules: HashMap<String, ApprovalPolicy>,
    pending: HashMap<String, oneshot::Sender<String>>,
}

/// Rule-set lookup plus a per-tool-call response rendezvous.
pub struct PermissionLayer {
    inner: Mutex<Inner>,
    sink: Arc<dyn PermissionEventSink>,
}

impl PermissionLayer {
    pub fn new(sink: Arc<dyn PermissionEventSink>) -> Self {
        Self {
            inner: Mutex::new(Inner { rules: default_rules(), pending: HashMap::new() }),
            sink,
        }
    }

    pub fn with_rules(rules: HashMap<String, ApprovalPolicy>, sink: Arc<dyn PermissionEventSink>) -> Self {
        Self { inner: Mutex::new(Inner { rules, pending: HashMap::new() }), sink }
    }

    /// Pure lookup; unknown tools return `Deny`.
    pub fn check(&self, tool_name: &str) -> ApprovalPolicy {
        self.inner
            .lock()
            .unwrap()
            .rules
            .get(tool_name)
            .copied()
            .unwrap_or(ApprovalPolicy::Deny)
    }

    pub fn set_rule(&self, tool_name: impl Into<String>, decision: ApprovalPolicy) {
        self.inner.lock().unwrap().rules.insert(tool_name.into(), decision);
    }

    /// Registers a fresh response slot under `tool_call_id`, emits a
    /// permission-request event, and blocks until [`Self::respond`] is
    /// invoked for that id — then removes the slot and returns the selected
    /// option id.
    pub async fn request(&self, tool_call_id: &str, tool_name: &str, options: &[PermissionOption]) -> String {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().pending.insert(tool_call_id.to_string(), tx);

        debug!(tool_call_id, tool_name, "permission request");
        self.sink.emit_permission_request(tool_call_id, tool_name, options).await;

        match rx.await {
            Ok(option_id) => option_id,
            Err(_) => {
                warn!(tool_call_id, "permission slot dropped without a response");
                "deny".to_string()
            }
        }
    }

    /// Delivers `option_id` into the slot for `tool_call_id`; a no-op if no
    /// slot exists (already answered, or never requested).
    pub fn respond(&self, tool_call_id: &str, option_id: &str) {
        if let Some(tx) = self.inner.lock().unwrap().pending.remove(tool_call_id) {
            let _ = tx.send(option_id.to_string());
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
