// SPDX-License-Identifier: MIT
//! Direct-API session (§4.6): owns a conversation history and repeatedly
//! calls a vendor Messages endpoint with streaming enabled until the stop
//! reason is no longer `tool_use`, running the client-side tool loop in
//! between turns.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use conduit_model::{
    CompletionRequest, Message, ModelProvider, ResponseEvent, ToolResultBlock, ToolSchema, ToolUseBlock,
};
use conduit_permission::{ApprovalPolicy, PermissionLayer};
use conduit_state::{
    Event, FileChangeStore, PermissionOption, PermissionRequestPayload, ToolCallState, ToolCallStatus, ToolKind,
    ToolStateStore,
};
use conduit_tools::ToolRegistry;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum DirectError {
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// The only option id the tool loop treats as approval; anything else —
/// including a legitimate `reject_once`/`reject_always` — is a denial (§4.6).
pub const ALLOW_OPTION: &str = "allow";
pub const DENY_OPTION: &str = "deny";

/// The two-option set offered for an "ask" tool-permission decision.
pub fn ask_options() -> Vec<PermissionOption> {
    vec![
        PermissionOption { option_id: ALLOW_OPTION.into(), name: "Allow".into(), kind: "allow_once".into() },
        PermissionOption { option_id: DENY_OPTION.into(), name: "Deny".into(), kind: "reject_once".into() },
    ]
}

fn kind_for_tool_name(name: &str) -> ToolKind {
    match name {
        "Read" => ToolKind::Read,
        "Write" | "Edit" => ToolKind::Edit,
        "Bash" => ToolKind::Execute,
        "Glob" | "Grep" => ToolKind::Search,
        _ => ToolKind::Other,
    }
}

/// Accumulates one streamed tool-use block across the deltas sharing its
/// `index` — the first event (`content_block_start`) carries the id/name,
/// later ones (`input_json_delta`) only contribute to `arguments`.
#[derive(Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Owns conversation history for one direct-API session and drives its turn
/// and tool loops. Unlike [`conduit_acp::AcpSession`] there is no external
/// agent subprocess: the model is called directly and every tool invocation
/// is dispatched locally through the tool registry.
pub struct DirectSession {
    provider: Box<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    permission_layer: Arc<PermissionLayer>,
    tool_states: Arc<ToolStateStore>,
    file_changes: Arc<FileChangeStore>,
    events: mpsc::Sender<Event>,
    history: Mutex<Vec<Message>>,
    cancel: Mutex<CancellationToken>,
}

impl DirectSession {
    pub fn new(
        provider: Box<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        permission_layer: Arc<PermissionLayer>,
        tool_states: Arc<ToolStateStore>,
        file_changes: Arc<FileChangeStore>,
        events: mpsc::Sender<Event>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            registry,
            permission_layer,
            tool_states,
            file_changes,
            events,
            history: Mutex::new(Vec::new()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Snapshot of the conversation history accumulated so far.
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().unwrap().clone()
    }

    /// Cancels the in-flight HTTP stream or tool execution, if any, and arms
    /// a fresh token for the next turn. Mode operations are no-ops for this
    /// backend — it has no modes.
    pub fn cancel(&self) {
        let mut guard = self.cancel.lock().unwrap();
        guard.cancel();
        *guard = CancellationToken::new();
    }

    async fn emit(&self, event: Event) {
        let _ = self.events.send(event).await;
    }

    /// Appends a user message and drives turns until the model stops for a
    /// reason other than `tool_use`, returning that final stop reason.
    pub async fn send_prompt(&self, text: &str) -> Result<String, DirectError> {
        self.history.lock().unwrap().push(Message::user(text));

        loop {
            let token = self.cancel.lock().unwrap().clone();
            if token.is_cancelled() {
                let reason = "cancelled".to_string();
                self.emit(Event::PromptComplete { stop_reason: reason.clone() }).await;
                return Ok(reason);
            }

            let (stop_reason, tool_calls) = self.run_turn(&token).await?;

            if stop_reason == "cancelled" {
                self.emit(Event::PromptComplete { stop_reason: stop_reason.clone() }).await;
                return Ok(stop_reason);
            }
            if stop_reason != "tool_use" {
                self.emit(Event::PromptComplete { stop_reason: stop_reason.clone() }).await;
                return Ok(stop_reason);
            }

            self.run_tool_loop(&tool_calls, &token).await?;
        }
    }

    /// One model turn: marshal history, stream the response, finalize the
    /// resulting assistant message, and report the stop reason plus any
    /// tool-use blocks the model requested.
    async fn run_turn(&self, cancel: &CancellationToken) -> Result<(String, Vec<ToolUseBlock>), DirectError> {
        let req = CompletionRequest {
            messages: self.history.lock().unwrap().clone(),
            tools: self
                .registry
                .schemas()
                .into_iter()
                .map(|s| ToolSchema { name: s.name, description: s.description, parameters: s.parameters })
                .collect(),
        };

        let mut stream = self.provider.complete(req).await?;

        let mut text = String::new();
        let mut calls: HashMap<u32, ToolCallBuilder> = HashMap::new();
        let mut call_order: Vec<u32> = Vec::new();
        let mut started: HashSet<u32> = HashSet::new();
        let mut stop_reason = "end_turn".to_string();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                item = stream.next() => item,
            };
            let Some(item) = next else {
                if cancel.is_cancelled() {
                    return Ok(("cancelled".to_string(), Vec::new()));
                }
                break;
            };
            match item? {
                ResponseEvent::TextDelta(t) => {
                    if !t.is_empty() {
                        text.push_str(&t);
                        self.emit(Event::MessageChunk(t)).await;
                    }
                }
                ResponseEvent::ThinkingDelta(t) => {
                    self.emit(Event::ThoughtChunk(t)).await;
                }
                ResponseEvent::ToolCall { index, id, name, arguments } => {
                    if !calls.contains_key(&index) {
                        calls.insert(index, ToolCallBuilder::default());
                        call_order.push(index);
                    }
                    let entry = calls.get_mut(&index).unwrap();
                    if !id.is_empty() {
                        entry.id = id;
                    }
                    if !name.is_empty() {
                        entry.name = name;
                    }
                    entry.arguments.push_str(&arguments);

                    // Tool-state becomes `pending` as soon as the block
                    // starts (id and name known), independent of however
                    // many `input_json_delta` fragments follow.
                    if started.insert(index) && !entry.id.is_empty() && !entry.name.is_empty() {
                        let mut state = ToolCallState::new(entry.id.clone(), entry.name.clone(), entry.name.clone());
                        state.kind = kind_for_tool_name(&state.canonical_name);
                        self.tool_states.set(state.clone());
                        self.emit(Event::ToolState(state)).await;
                    }
                }
                ResponseEvent::Usage { .. } => {}
                ResponseEvent::StopForToolUse => stop_reason = "tool_use".to_string(),
                ResponseEvent::MaxTokens => stop_reason = "max_tokens".to_string(),
                ResponseEvent::Done => break,
            }
        }

        let tool_calls: Vec<ToolUseBlock> = call_order
            .into_iter()
            .filter_map(|idx| calls.remove(&idx))
            .filter(|c| !c.id.is_empty())
            .map(|c| ToolUseBlock { id: c.id, name: c.name, arguments: c.arguments })
            .collect();

        if tool_calls.is_empty() {
            if !text.is_empty() {
                self.history.lock().unwrap().push(Message::assistant(text));
            }
        } else {
            let message_text = if text.is_empty() { None } else { Some(text) };
            self.history.lock().unwrap().push(Message::assistant_turn(message_text, tool_calls.clone()));
        }

        Ok((stop_reason, tool_calls))
    }

    /// Runs every tool-use block from the just-finalized assistant message
    /// through the permission layer and the tool registry, then appends a
    /// single batched tool-result message (§4.6).
    async fn run_tool_loop(&self, tool_calls: &[ToolUseBlock], cancel: &CancellationToken) -> Result<(), DirectError> {
        let mut results = Vec::with_capacity(tool_calls.len());

        for call in tool_calls {
            let (content, is_error) = self.run_one_tool(call, cancel).await;
            results.push(ToolResultBlock {
                tool_call_id: call.id.clone(),
                content: conduit_model::ToolResultContent::Text(content),
                is_error,
            });
        }

        self.history.lock().unwrap().push(Message::tool_results(results));
        Ok(())
    }

    async fn run_one_tool(&self, call: &ToolUseBlock, cancel: &CancellationToken) -> (String, bool) {
        match self.permission_layer.check(&call.name) {
            ApprovalPolicy::Deny => {
                if let Some(s) = self.tool_states.update(&call.id, |s| s.status = ToolCallStatus::Error) {
                    self.emit(Event::ToolState(s)).await;
                }
                ("Permission denied".to_string(), true)
            }
            ApprovalPolicy::Ask => {
                let options = ask_options();
                if let Some(s) = self.tool_states.update(&call.id, |s| {
                    s.status = ToolCallStatus::AwaitingPermission;
                    s.permission_options = options.clone();
                }) {
                    self.emit(Event::ToolState(s)).await;
                    self.emit(Event::PermissionRequest(PermissionRequestPayload {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        options: options.clone(),
                    }))
                    .await;
                }

                let decision = self.permission_layer.request(&call.id, &call.name, &options).await;
                if decision != ALLOW_OPTION {
                    if let Some(s) = self.tool_states.update(&call.id, |s| s.status = ToolCallStatus::Error) {
                        self.emit(Event::ToolState(s)).await;
                    }
                    ("Permission denied".to_string(), true)
                } else {
                    self.execute_tool(call, cancel).await
                }
            }
            ApprovalPolicy::Allow => self.execute_tool(call, cancel).await,
        }
    }

    async fn execute_tool(&self, call: &ToolUseBlock, cancel: &CancellationToken) -> (String, bool) {
        if let Some(s) = self.tool_states.update(&call.id, |s| s.status = ToolCallStatus::Running) {
            self.emit(Event::ToolState(s)).await;
        }

        let input: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);

        match self.registry.execute(&call.name, &input, cancel).await {
            Ok(result) => {
                if !result.is_error {
                    if let Some(path) = result.file_path.clone() {
                        let original = result.old_content.clone().unwrap_or_default();
                        let current = result.new_content.clone().unwrap_or_default();
                        self.file_changes.record_change(path, original, current, result.hunks.clone());
                        self.emit(Event::FileChangesUpdated(self.file_changes.get_all())).await;
                    }
                    if let Some(s) = self.tool_states.update(&call.id, |s| {
                        s.status = ToolCallStatus::Completed;
                        s.output = vec![result.content.clone()];
                    }) {
                        self.emit(Event::ToolState(s)).await;
                    }
                    (result.content, false)
                } else {
                    if let Some(s) = self.tool_states.update(&call.id, |s| {
                        s.status = ToolCallStatus::Error;
                        s.output = vec![result.content.clone()];
                    }) {
                        self.emit(Event::ToolState(s)).await;
                    }
                    (result.content, true)
                }
            }
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool not found");
                let msg = err.to_string();
                if let Some(s) = self.tool_states.update(&call.id, |s| {
                    s.status = ToolCallStatus::Error;
                    s.output = vec![msg.clone()];
                }) {
                    self.emit(Event::ToolState(s)).await;
                }
                (msg, true)
            }
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
