// SPDX-License-Identifier: MIT
//! The ACP session state machine (§4.5): drives an external agent subprocess
//! via [`conduit_rpc::Transport`], translates inbound `session/update`
//! notifications into [`Event`]s, and answers `session/request_permission`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use conduit_permission::PermissionLayer;
use conduit_rpc::{RpcError, Transport};
use conduit_state::{
    Event, FileChangeStore, PatchHunk, PermissionOption, PermissionRequestPayload, PlanEntry,
    PlanEntryStatus, PlanPriority, ToolCallState, ToolCallStatus, ToolKind, ToolStateStore,
};
use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::adapter::{canonical_tool_name, default_chain, resolve, StructuredToolResponse, ToolUpdateAdapter};

/// The internal tool name agents invoke to ask the user a question (§4.8).
/// Its own permission prompt is always short-circuited to avoid looping the
/// user through a permission dialog for the mechanism that asks them things.
pub const ASK_USER_TOOL_NAME: &str = "ask_user_question";

#[derive(Debug, thiserror::Error)]
pub enum AcpError {
    #[error("session not yet opened (call new_session first)")]
    NotOpen,
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// `unstarted -> initialized -> session-open -> prompting <-> idle -> closed` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpSessionState {
    Unstarted,
    Initialized,
    SessionOpen,
    Prompting,
    Idle,
    Closed,
}

/// Flags controlling an ephemeral review session (§4.7, §4.9 design notes):
/// auto-approve every permission request and suppress tool-state events so
/// the review narrative surfaces as plain chat.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewOptions {
    pub auto_permission: bool,
    pub suppress_tool_events: bool,
}

/// A session with an external ACP agent subprocess.
pub struct AcpSession {
    transport: Transport,
    child: Mutex<Option<Child>>,
    session_id: Mutex<Option<String>>,
    state: Mutex<AcpSessionState>,
    current_mode: Mutex<Option<String>>,
    available_modes: Mutex<Vec<String>>,
    tool_states: Arc<ToolStateStore>,
    file_changes: Arc<FileChangeStore>,
    events: mpsc::Sender<Event>,
    permission_layer: Option<Arc<PermissionLayer>>,
    adapters: Vec<Box<dyn ToolUpdateAdapter>>,
    review: ReviewOptions,
    /// Response slots for the fallback permission path (no layer attached):
    /// the caller wires `respond_permission` directly instead.
    fallback_pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
    closed: AtomicBool,
}

impl AcpSession {
    /// Builds a session over an already-connected transport (production
    /// callers use [`crate::process::spawn_subprocess`] to obtain one; tests
    /// wire an in-process duplex transport directly).
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        transport: Transport,
        tool_states: Arc<ToolStateStore>,
        file_changes: Arc<FileChangeStore>,
        events: mpsc::Sender<Event>,
        permission_layer: Option<Arc<PermissionLayer>>,
        review: ReviewOptions,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            transport,
            child: Mutex::new(None),
            session_id: Mutex::new(None),
            state: Mutex::new(AcpSessionState::Unstarted),
            current_mode: Mutex::new(None),
            available_modes: Mutex::new(Vec::new()),
            tool_states,
            file_changes,
            events,
            permission_layer,
            adapters: default_chain(),
            review,
            fallback_pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        // Registered before returning: an inbound frame racing the caller's
        // next action (e.g. `initialize`) must never find no handler installed.
        let handler_session = session.clone();
        session
            .transport
            .on_method(move |method, params, id| {
                let session = handler_session.clone();
                async move {
                    match (method.as_str(), id) {
                        ("session/update", None) => session.handle_update(params).await,
                        ("session/request_permission", Some(id)) => {
                            session.handle_permission_request(params, id).await
                        }
                        _ => {
                            debug!(method = %method, "unhandled inbound ACP method");
                        }
                    }
                }
            })
            .await;

        session
    }

    /// Attaches the subprocess handle so [`Self::close`] can terminate it.
    pub fn attach_child(&self, child: Child) {
        *self.child.lock().unwrap() = Some(child);
    }

    pub fn state(&self) -> AcpSessionState {
        *self.state.lock().unwrap()
    }

    pub fn current_mode(&self) -> Option<String> {
        self.current_mode.lock().unwrap().clone()
    }

    pub fn available_modes(&self) -> Vec<String> {
        self.available_modes.lock().unwrap().clone()
    }

    /// `initialize({protocolVersion:1, clientCapabilities:{terminal:false}})` (§6.1).
    pub async fn initialize(&self) -> Result<Value, AcpError> {
        let result = self
            .transport
            .send(
                "initialize",
                json!({ "protocolVersion": 1, "clientCapabilities": { "terminal": false } }),
            )
            .await?;
        *self.state.lock().unwrap() = AcpSessionState::Initialized;
        Ok(result)
    }

    /// `session/new({cwd, mcpServers})`, recording the assigned session id
    /// and any reported modes.
    pub async fn new_session(&self, cwd: &str, mcp_servers: Vec<Value>) -> Result<String, AcpError> {
        let result = self
            .transport
            .send("session/new", json!({ "cwd": cwd, "mcpServers": mcp_servers }))
            .await?;
        let session_id = result.get("sessionId").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        *self.session_id.lock().unwrap() = Some(session_id.clone());

        if let Some(modes) = result.get("modes") {
            let current = modes.get("currentModeId").and_then(|v| v.as_str()).map(str::to_string);
            let available: Vec<String> = modes
                .get("availableModes")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|m| m.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            *self.current_mode.lock().unwrap() = current;
            *self.available_modes.lock().unwrap() = available;
        }

        *self.state.lock().unwrap() = AcpSessionState::SessionOpen;
        Ok(session_id)
    }

    /// `session/prompt({sessionId, prompt, allowedTools})`, returning the
    /// stop reason. `prompting` lasts for the duration of this call; any
    /// number of `session/update`/`session/request_permission` messages may
    /// arrive while it is in flight.
    pub async fn send_prompt(&self, text: &str, allowed_tools: Option<Vec<String>>) -> Result<String, AcpError> {
        let session_id = self.session_id.lock().unwrap().clone().ok_or(AcpError::NotOpen)?;
        *self.state.lock().unwrap() = AcpSessionState::Prompting;

        let mut params = json!({
            "sessionId": session_id,
            "prompt": [{ "type": "text", "text": text }],
        });
        if let Some(tools) = allowed_tools {
            params["allowedTools"] = json!(tools);
        }

        let result = self.transport.send("session/prompt", params).await;
        *self.state.lock().unwrap() = AcpSessionState::Idle;

        let result = result?;
        let stop_reason = result.get("stopReason").and_then(|v| v.as_str()).unwrap_or("end_turn").to_string();
        Ok(stop_reason)
    }

    /// `session/set_mode({sessionId, modeId})`.
    pub async fn set_mode(&self, mode_id: &str) -> Result<(), AcpError> {
        let session_id = self.session_id.lock().unwrap().clone().ok_or(AcpError::NotOpen)?;
        self.transport.send("session/set_mode", json!({ "sessionId": session_id, "modeId": mode_id })).await?;
        *self.current_mode.lock().unwrap() = Some(mode_id.to_string());
        Ok(())
    }

    /// Sends `session/cancel` as a notification. Non-blocking and
    /// best-effort: the in-flight `session/prompt` is expected to resolve
    /// with stop reason `cancelled`.
    pub async fn cancel(&self) {
        if let Some(session_id) = self.session_id.lock().unwrap().clone() {
            self.transport.notify("session/cancel", json!({ "sessionId": session_id })).await;
        }
    }

    /// Delivers an answer for the fallback permission path (no
    /// [`PermissionLayer`] attached to this session).
    pub fn respond_permission(&self, tool_call_id: &str, option_id: &str) {
        if let Some(tx) = self.fallback_pending.lock().unwrap().remove(tool_call_id) {
            let _ = tx.send(option_id.to_string());
        }
    }

    /// Terminates the subprocess (if attached), closes the transport, and
    /// marks the session closed. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.start_kill();
        }
        self.transport.close().await;
        *self.state.lock().unwrap() = AcpSessionState::Closed;
    }

    async fn emit(&self, event: Event) {
        if self.events.send(event).await.is_err() {
            warn!("event sink closed; dropping event");
        }
    }

    async fn handle_update(&self, params: Value) {
        let Some(update) = params.get("update") else { return };
        let kind = update.get("sessionUpdate").and_then(|v| v.as_str()).unwrap_or("");

        match kind {
            "agent_message_chunk" => {
                let text = extract_chunk_text(update);
                if !text.is_empty() {
                    self.emit(Event::MessageChunk(text)).await;
                }
            }
            "agent_thought_chunk" => {
                let text = extract_chunk_text(update);
                if !text.is_empty() {
                    self.emit(Event::ThoughtChunk(text)).await;
                }
            }
            "tool_call" => self.handle_tool_call(update).await,
            "tool_call_update" => self.handle_tool_call_update(update).await,
            "current_mode_update" => {
                if let Some(mode_id) = update.get("currentModeId").and_then(|v| v.as_str()) {
                    *self.current_mode.lock().unwrap() = Some(mode_id.to_string());
                    self.emit(Event::ModeChanged(mode_id.to_string())).await;
                }
            }
            "plan" => {
                let entries = parse_plan_entries(update);
                self.emit(Event::PlanUpdate(entries)).await;
            }
            other => debug!(update_kind = other, "unrecognized session/update kind"),
        }
    }

    async fn handle_tool_call(&self, update: &Value) {
        let Some(id) = update.get("toolCallId").and_then(|v| v.as_str()) else { return };
        let adapter = resolve(&self.adapters, update);
        let canonical_name = adapter.tool_name(update);
        let title = update.get("title").and_then(|v| v.as_str()).unwrap_or(&canonical_name).to_string();

        let mut state = ToolCallState::new(id, title, canonical_name.clone());
        state.kind = parse_tool_kind(update.get("kind").and_then(|v| v.as_str()));
        state.status = parse_status(update.get("status").and_then(|v| v.as_str()));
        state.raw_input = update.get("rawInput").cloned().unwrap_or(Value::Null);
        state.parent_id = self.tool_states.current_parent();

        if canonical_name == "Task" {
            self.tool_states.push_parent(id);
        }

        if self.review.suppress_tool_events {
            return;
        }

        self.tool_states.set(state.clone());
        self.emit(Event::ToolState(state)).await;
    }

    async fn handle_tool_call_update(&self, update: &Value) {
        let Some(id) = update.get("toolCallId").and_then(|v| v.as_str()) else { return };
        let adapter = resolve(&self.adapters, update);
        let canonical_name = adapter.tool_name(update);

        let status_str = update.get("status").and_then(|v| v.as_str());
        let output = extract_output_blocks(update);
        let raw_input = update.get("rawInput").cloned();

        let updated = self.tool_states.update(id, |s| {
            if let Some(status_str) = status_str {
                s.status = parse_status(status_str);
            }
            if let Some(input) = &raw_input {
                s.raw_input = input.clone();
            }
            if !output.is_empty() {
                s.output = output.clone();
            }
        });

        if canonical_name == "Edit" || canonical_name == "Write" {
            if let Some(resp) = adapter.tool_response(update) {
                let hunks = adapter.diff_hunks(update);
                self.synthesize_file_change(&canonical_name, resp, hunks).await;
            }
        }

        if let Some(state) = &updated {
            if is_terminal(state.status) && canonical_name == "Task" {
                self.tool_states.pop_parent(id);
            }
        }

        if self.review.suppress_tool_events {
            return;
        }
        if let Some(state) = updated {
            self.emit(Event::ToolState(state)).await;
        }
    }

    async fn synthesize_file_change(&self, canonical_name: &str, resp: StructuredToolResponse, hunks: Vec<PatchHunk>) {
        let Some(path) = resp.file_path.clone().filter(|p| !p.is_empty()) else { return };

        let current = if canonical_name == "Write" {
            resp.content.clone().unwrap_or_default()
        } else {
            match &resp.content {
                Some(c) => c.clone(),
                None => {
                    let base = self
                        .file_changes
                        .get(&path)
                        .map(|fc| fc.current_content)
                        .or_else(|| resp.original_file.clone())
                        .unwrap_or_default();
                    match (&resp.old_string, &resp.new_string) {
                        (Some(o), Some(n)) if !o.is_empty() => base.replacen(o, n, 1),
                        _ => base,
                    }
                }
            }
        };

        let original = resp.original_file.clone().unwrap_or_default();
        self.file_changes.record_change(path, original, current, hunks);
        self.emit(Event::FileChangesUpdated(self.file_changes.get_all())).await;
    }

    async fn handle_permission_request(&self, params: Value, id: Value) {
        let tool_call_id = params.get("toolCall").and_then(|t| t.get("toolCallId")).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let title = params.get("toolCall").and_then(|t| t.get("title")).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let kind = params.get("toolCall").and_then(|t| t.get("kind")).and_then(|v| v.as_str());
        let canonical = canonical_tool_name(Some(title.as_str()), kind);

        let options: Vec<PermissionOption> = params
            .get("options")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|o| PermissionOption {
                        option_id: o.get("optionId").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        name: o.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        kind: o.get("kind").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let selected = if canonical == ASK_USER_TOOL_NAME || self.review.auto_permission {
            "allow_always".to_string()
        } else if let Some(layer) = &self.permission_layer {
            layer.request(&tool_call_id, &canonical, &options).await
        } else {
            self.tool_states.update(&tool_call_id, |s| {
                s.status = ToolCallStatus::AwaitingPermission;
                s.permission_options = options.clone();
            });
            if let Some(state) = self.tool_states.get(&tool_call_id) {
                self.emit(Event::ToolState(state)).await;
            }
            self.emit(Event::PermissionRequest(PermissionRequestPayload {
                tool_call_id: tool_call_id.clone(),
                tool_name: canonical.clone(),
                options: options.clone(),
            }))
            .await;

            let (tx, rx) = oneshot::channel();
            self.fallback_pending.lock().unwrap().insert(tool_call_id.clone(), tx);
            rx.await.unwrap_or_else(|_| "reject_once".to_string())
        };

        self.transport.respond(id, json!({ "outcome": { "outcome": "selected", "optionId": selected } })).await;
    }
}

fn is_terminal(status: ToolCallStatus) -> bool {
    matches!(status, ToolCallStatus::Completed | ToolCallStatus::Error | ToolCallStatus::Cancelled)
}

fn parse_status(raw: Option<&str>) -> ToolCallStatus {
    match raw {
        Some("pending") => ToolCallStatus::Pending,
        Some("in_progress") => ToolCallStatus::Running,
        Some("awaiting_permission") => ToolCallStatus::AwaitingPermission,
        Some("completed") => ToolCallStatus::Completed,
        Some("failed") | Some("error") => ToolCallStatus::Error,
        Some("cancelled") => ToolCallStatus::Cancelled,
        _ => ToolCallStatus::Pending,
    }
}

fn parse_tool_kind(raw: Option<&str>) -> ToolKind {
    match raw {
        Some("read") => ToolKind::Read,
        Some("edit") => ToolKind::Edit,
        Some("delete") => ToolKind::Delete,
        Some("move") => ToolKind::Move,
        Some("search") => ToolKind::Search,
        Some("execute") => ToolKind::Execute,
        Some("think") => ToolKind::Think,
        Some("fetch") => ToolKind::Fetch,
        _ => ToolKind::Other,
    }
}

fn extract_chunk_text(update: &Value) -> String {
    update
        .get("content")
        .and_then(|c| c.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_output_blocks(update: &Value) -> Vec<String> {
    update
        .get("output")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|block| block.get("text").and_then(|v| v.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_plan_entries(update: &Value) -> Vec<PlanEntry> {
    update
        .get("entries")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|e| PlanEntry {
                    content: e.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    priority: match e.get("priority").and_then(|v| v.as_str()) {
                        Some("high") => PlanPriority::High,
                        Some("low") => PlanPriority::Low,
                        _ => PlanPriority::Medium,
                    },
                    status: match e.get("status").and_then(|v| v.as_str()) {
                        Some("in_progress") => PlanEntryStatus::InProgress,
                        Some("completed") => PlanEntryStatus::Completed,
                        _ => PlanEntryStatus::Pending,
                    },
                })
                .collect()
        })
        .unwrap_or_default()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
