// SPDX-License-Identifier: MIT
//! The session supervisor (§4.7): owns the session map, the active-session
//! pointer, and fans per-session internal [`Event`]s out to the presentation
//! layer under the `session:<id>:<topic>` naming convention. Also owns the
//! process-wide "ask user" MCP server (§4.8) shared by every ACP session.

mod permission_sink;
mod review;
mod types;

pub use permission_sink::ForwardingPermissionSink;
pub use types::{PresentationEvent, ReviewComment, SessionSummary};

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use conduit_acp::{spawn_subprocess, AcpError, AcpSession, ReviewOptions};
use conduit_config::{Backend, Config};
use conduit_direct::{DirectError, DirectSession};
use conduit_mcp::{serve_sse, AskUserState, UserQuestionRequest};
use conduit_permission::{PermissionEventSink, PermissionLayer, PermissionOption};
use conduit_state::{Event, FileChangeStore, ToolStateStore};
use conduit_tools::default_registry;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no such session: {0}")]
    NoSuchSession(String),
    #[error("no active session")]
    NoActiveSession,
    #[error(transparent)]
    Acp(#[from] AcpError),
    #[error(transparent)]
    Direct(#[from] DirectError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Dispatches the handful of operations common to both backends (§4.5, §4.6)
/// without either session type knowing about the other.
enum BackendSession {
    Acp(Arc<AcpSession>),
    Direct(Arc<DirectSession>),
}

impl BackendSession {
    async fn send_prompt(&self, text: &str) -> Result<String, SupervisorError> {
        match self {
            BackendSession::Acp(s) => Ok(s.send_prompt(text, None).await?),
            BackendSession::Direct(s) => Ok(s.send_prompt(text).await?),
        }
    }

    async fn cancel(&self) {
        match self {
            BackendSession::Acp(s) => s.cancel().await,
            BackendSession::Direct(s) => s.cancel(),
        }
    }

    async fn close(&self) {
        if let BackendSession::Acp(s) = self {
            s.close().await;
        }
    }

    async fn set_mode(&self, mode_id: &str) -> Result<(), SupervisorError> {
        match self {
            BackendSession::Acp(s) => Ok(s.set_mode(mode_id).await?),
            // Mode operations are a no-op for the direct-API backend — it has no modes (§4.6).
            BackendSession::Direct(_) => Ok(()),
        }
    }

    fn current_mode(&self) -> Option<String> {
        match self {
            BackendSession::Acp(s) => s.current_mode(),
            BackendSession::Direct(_) => None,
        }
    }

    fn available_modes(&self) -> Vec<String> {
        match self {
            BackendSession::Acp(s) => s.available_modes(),
            BackendSession::Direct(_) => Vec::new(),
        }
    }

    fn respond_fallback_permission(&self, tool_call_id: &str, option_id: &str) {
        if let BackendSession::Acp(s) = self {
            s.respond_permission(tool_call_id, option_id);
        }
    }
}

/// Everything the supervisor tracks for one session: its backend handle
/// plus the state it alone owns (§3 Session).
struct SessionEntry {
    name: String,
    created_at: String,
    backend: BackendSession,
    tool_states: Arc<ToolStateStore>,
    file_changes: Arc<FileChangeStore>,
    permission_layer: Arc<PermissionLayer>,
    /// The tool-call id of the most recently emitted, still-unanswered
    /// permission request, if any. `permission_response` (§6.4) carries only
    /// an `optionId`, so the supervisor must remember which call it answers.
    pending_permission: Arc<Mutex<Option<String>>>,
}

struct Inner {
    sessions: HashMap<String, SessionEntry>,
    order: Vec<String>,
    active: Option<String>,
}

/// Routes a permission request into both the session's event stream (via
/// [`ForwardingPermissionSink`]) and the supervisor's own bookkeeping of
/// "what is the active ask" for that session.
struct TrackingPermissionSink {
    inner: ForwardingPermissionSink,
    pending: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl PermissionEventSink for TrackingPermissionSink {
    async fn emit_permission_request(&self, tool_call_id: &str, tool_name: &str, options: &[PermissionOption]) {
        *self.pending.lock().unwrap() = Some(tool_call_id.to_string());
        self.inner.emit_permission_request(tool_call_id, tool_name, options).await;
    }
}

/// Owns every session, the active pointer, and the process-wide "ask user"
/// MCP server. A single lock guards the session map and active pointer;
/// each session's own stores are independently synchronized (§4.2).
pub struct Supervisor {
    config: Arc<Config>,
    inner: Mutex<Inner>,
    presentation: mpsc::Sender<PresentationEvent>,
    ask_user: Arc<AskUserState>,
    ask_user_addr: std::net::SocketAddr,
    mcp_shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl Supervisor {
    /// Starts the process-wide MCP "ask user" server and returns a
    /// supervisor with no sessions. `question_rx` is drained by the caller
    /// (typically forwarded into `user_question` presentation events as they
    /// arrive, or bridged directly — the supervisor only owns the sender side
    /// paired into [`AskUserState`]).
    pub async fn new(
        config: Arc<Config>,
        presentation: mpsc::Sender<PresentationEvent>,
    ) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<UserQuestionRequest>)> {
        let (question_tx, question_rx) = mpsc::channel(16);
        let ask_user = AskUserState::new(question_tx);
        let (addr, shutdown) = serve_sse(ask_user.clone()).await?;

        let supervisor = Arc::new(Self {
            config,
            inner: Mutex::new(Inner { sessions: HashMap::new(), order: Vec::new(), active: None }),
            presentation,
            ask_user,
            ask_user_addr: addr,
            mcp_shutdown: shutdown,
            next_id: AtomicU64::new(1),
        });

        Ok((supervisor, question_rx))
    }

    /// The `mcpServers` entry (§6.1) registering the process-wide "ask user"
    /// server with a freshly created ACP session.
    fn ask_user_mcp_server(&self) -> serde_json::Value {
        serde_json::json!({
            "name": "ask_user",
            "type": "sse",
            "url": format!("http://{}/sse", self.ask_user_addr),
        })
    }

    async fn publish(&self, event: PresentationEvent) {
        if self.presentation.send(event).await.is_err() {
            warn!("presentation channel closed; dropping event");
        }
    }

    async fn publish_sessions_updated(&self) {
        self.publish(PresentationEvent::SessionsUpdated { sessions: self.sessions() }).await;
    }

    /// Creates a new session, selecting the backend from the supervisor's
    /// configuration, and makes it active. Returns the supervisor-assigned
    /// session id (distinct from any id an ACP agent assigns internally).
    pub async fn create_session(self: &Arc<Self>, name: impl Into<String>, cwd: impl AsRef<Path>) -> Result<String, SupervisorError> {
        let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let name = name.into();
        let tool_states = Arc::new(ToolStateStore::new());
        let file_changes = Arc::new(FileChangeStore::new());
        let pending_permission = Arc::new(Mutex::new(None));
        let (events_tx, events_rx) = mpsc::channel(100);

        let sink = Arc::new(TrackingPermissionSink {
            inner: ForwardingPermissionSink { tool_states: tool_states.clone(), events: events_tx.clone() },
            pending: pending_permission.clone(),
        });
        let permission_layer = Arc::new(PermissionLayer::new(sink));

        let backend = match self.config.backend {
            Backend::Acp => {
                let (command, args) = self
                    .config
                    .agent_command
                    .split_first()
                    .ok_or_else(|| anyhow::anyhow!("CONDUIT_ACP_COMMAND must name an executable"))?;
                let (transport, child) = spawn_subprocess(command, args, cwd.as_ref(), &[])?;
                let session = AcpSession::new(
                    transport,
                    tool_states.clone(),
                    file_changes.clone(),
                    events_tx.clone(),
                    Some(permission_layer.clone()),
                    ReviewOptions::default(),
                )
                .await;
                session.attach_child(child);
                session.initialize().await?;
                let cwd_str = cwd.as_ref().to_string_lossy().to_string();
                session.new_session(&cwd_str, vec![self.ask_user_mcp_server()]).await?;
                BackendSession::Acp(session)
            }
            Backend::Anthropic => {
                let provider = conduit_model::from_config(&self.config)?;
                let registry = Arc::new(default_registry());
                let session = DirectSession::new(
                    provider,
                    registry,
                    permission_layer.clone(),
                    tool_states.clone(),
                    file_changes.clone(),
                    events_tx.clone(),
                );
                BackendSession::Direct(session)
            }
        };

        let entry = SessionEntry {
            name,
            created_at: Utc::now().to_rfc3339(),
            backend,
            tool_states,
            file_changes,
            permission_layer,
            pending_permission,
        };

        {
            let mut inner = self.inner.lock().unwrap();
            inner.sessions.insert(id.clone(), entry);
            inner.order.push(id.clone());
            inner.active = Some(id.clone());
        }

        self.spawn_bridge(id.clone(), events_rx, false);
        self.publish_sessions_updated().await;
        self.publish(PresentationEvent::ActiveSessionChanged { id: id.clone() }).await;
        Ok(id)
    }

    /// Translates one session's internal [`Event`]s into
    /// `session:<id>:<topic>` presentation events, in order, until the
    /// sink closes (§4.7 fan-out). Tool-state and file-change topics are
    /// suppressed for review sessions so the review narrative surfaces as
    /// plain chat (§4.9 design notes).
    fn spawn_bridge(self: &Arc<Self>, id: String, mut events: mpsc::Receiver<Event>, is_review: bool) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let (topic, payload) = match event {
                    Event::MessageChunk(text) => {
                        (if is_review { "review_agent_chunk" } else { "chat_chunk" }, serde_json::json!(text))
                    }
                    Event::ThoughtChunk(text) => ("chat_thought", serde_json::json!(text)),
                    Event::ToolState(state) => {
                        if is_review {
                            continue;
                        }
                        ("tool_state", serde_json::to_value(&state).unwrap_or_default())
                    }
                    Event::ModeChanged(mode) => ("mode_changed", serde_json::json!(mode)),
                    Event::ModesAvailable(modes) => ("modes_available", serde_json::json!(modes)),
                    Event::PlanUpdate(entries) => ("plan_update", serde_json::to_value(&entries).unwrap_or_default()),
                    Event::PermissionRequest(payload) => {
                        ("permission_request", serde_json::to_value(&payload).unwrap_or_default())
                    }
                    Event::PromptComplete { stop_reason } => {
                        ("prompt_complete", serde_json::json!({ "stopReason": stop_reason }))
                    }
                    Event::FileChangesUpdated(changes) => {
                        if is_review {
                            continue;
                        }
                        ("file_changes_updated", serde_json::to_value(&changes).unwrap_or_default())
                    }
                    Event::Error(message) => ("error", serde_json::json!(message)),
                };
                supervisor.publish(PresentationEvent::Session { id: id.clone(), topic: topic.to_string(), payload }).await;
            }
            debug!(session_id = %id, "event bridge exiting: sink closed");
        });
    }

    /// Validates `id` exists and makes it active.
    pub async fn switch_session(&self, id: &str) -> Result<(), SupervisorError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.sessions.contains_key(id) {
                return Err(SupervisorError::NoSuchSession(id.to_string()));
            }
            inner.active = Some(id.to_string());
        }
        self.publish(PresentationEvent::ActiveSessionChanged { id: id.to_string() }).await;
        Ok(())
    }

    /// Removes `id`, closes its backend (terminating any subprocess/stream),
    /// and promotes a remaining session as active, if any.
    pub async fn close_session(&self, id: &str) {
        let (entry, new_active) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(entry) = inner.sessions.remove(id) else { return };
            inner.order.retain(|x| x != id);
            if inner.active.as_deref() == Some(id) {
                inner.active = inner.order.last().cloned();
            }
            (entry, inner.active.clone())
        };
        // The event sink (`events_tx`) was dropped along with `entry`'s
        // backend handle above, so the bridge observes channel close and
        // exits on its own — no separate close signal needed here.
        entry.backend.close().await;

        self.publish_sessions_updated().await;
        match new_active {
            Some(active) => self.publish(PresentationEvent::ActiveSessionChanged { id: active }).await,
            None => debug!("closed the last session; no active session remains"),
        }
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| {
                let entry = inner.sessions.get(id)?;
                Some(SessionSummary {
                    id: id.clone(),
                    name: entry.name.clone(),
                    created_at: entry.created_at.clone(),
                    mode_id: entry.backend.current_mode(),
                })
            })
            .collect()
    }

    pub fn active_session(&self) -> Option<String> {
        self.inner.lock().unwrap().active.clone()
    }

    pub fn current_mode(&self, id: &str) -> Option<String> {
        self.inner.lock().unwrap().sessions.get(id)?.backend.current_mode()
    }

    pub fn available_modes(&self, id: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(id)
            .map(|e| e.backend.available_modes())
            .unwrap_or_default()
    }

    pub async fn set_mode(&self, id: &str, mode_id: &str) -> Result<(), SupervisorError> {
        // SessionEntry isn't Clone; clone the backend's inner Arc (cheap) and
        // drop the lock before the async call.
        let backend = {
            let inner = self.inner.lock().unwrap();
            let entry = inner.sessions.get(id).ok_or_else(|| SupervisorError::NoSuchSession(id.to_string()))?;
            match &entry.backend {
                BackendSession::Acp(s) => BackendSession::Acp(s.clone()),
                BackendSession::Direct(s) => BackendSession::Direct(s.clone()),
            }
        };
        backend.set_mode(mode_id).await
    }

    fn active_entry_backend(&self) -> Result<(BackendSession, String), SupervisorError> {
        let inner = self.inner.lock().unwrap();
        let id = inner.active.clone().ok_or(SupervisorError::NoActiveSession)?;
        let entry = inner.sessions.get(&id).ok_or(SupervisorError::NoActiveSession)?;
        let backend = match &entry.backend {
            BackendSession::Acp(s) => BackendSession::Acp(s.clone()),
            BackendSession::Direct(s) => BackendSession::Direct(s.clone()),
        };
        Ok((backend, id))
    }

    /// Inbound `send_message` (§6.4): dispatches to the active session.
    pub async fn send_message(&self, text: &str) -> Result<String, SupervisorError> {
        let (backend, _id) = self.active_entry_backend()?;
        backend.send_prompt(text).await
    }

    /// Inbound `permission_response(optionId)` (§6.4): answers whichever
    /// tool call in the active session is currently awaiting a decision.
    pub fn permission_response(&self, option_id: &str) -> Result<(), SupervisorError> {
        let inner = self.inner.lock().unwrap();
        let id = inner.active.clone().ok_or(SupervisorError::NoActiveSession)?;
        let entry = inner.sessions.get(&id).ok_or(SupervisorError::NoActiveSession)?;
        let Some(tool_call_id) = entry.pending_permission.lock().unwrap().take() else {
            return Ok(());
        };
        entry.permission_layer.respond(&tool_call_id, option_id);
        entry.backend.respond_fallback_permission(&tool_call_id, option_id);
        Ok(())
    }

    /// Inbound `user_answer({requestId, answer})` (§6.4): delivers an answer
    /// to the process-wide "ask user" MCP server (§4.8).
    pub fn user_answer(&self, request_id: &str, answer: &str) {
        self.ask_user.answer(request_id, answer.to_string());
    }

    /// Inbound `cancel()` (§6.4): cancels the active session's in-flight turn.
    pub async fn cancel(&self) -> Result<(), SupervisorError> {
        let (backend, _id) = self.active_entry_backend()?;
        backend.cancel().await;
        Ok(())
    }

    /// Inbound `submit_review(comments)` (§6.4, §4.7): formats the active
    /// session's accumulated file changes plus the review comments into a
    /// synthetic prompt and runs it through an ephemeral secondary session
    /// sharing only the file-change store. See [`review`] for the formatting.
    pub async fn submit_review(self: &Arc<Self>, comments: Vec<ReviewComment>) -> Result<(), SupervisorError> {
        let (active_id, file_changes, review_session) = {
            let inner = self.inner.lock().unwrap();
            let id = inner.active.clone().ok_or(SupervisorError::NoActiveSession)?;
            let entry = inner.sessions.get(&id).ok_or(SupervisorError::NoActiveSession)?;
            (id.clone(), entry.file_changes.clone(), format!("{}-review", id))
        };

        let prompt = review::format_review_prompt(&file_changes.get_all(), &comments);

        self.publish(PresentationEvent::Session {
            id: active_id.clone(),
            topic: "review_agent_running".to_string(),
            payload: serde_json::json!(true),
        })
        .await;

        let tool_states = Arc::new(ToolStateStore::new());
        let pending_permission = Arc::new(Mutex::new(None));
        let (events_tx, events_rx) = mpsc::channel(100);
        let sink = Arc::new(TrackingPermissionSink {
            inner: ForwardingPermissionSink { tool_states: tool_states.clone(), events: events_tx.clone() },
            pending: pending_permission.clone(),
        });
        // Auto-permission is on for review mode, so this rule set is never
        // actually consulted — kept default for parity with a normal session.
        let permission_layer = Arc::new(PermissionLayer::new(sink));

        let backend = match self.config.backend {
            Backend::Acp => {
                let (command, args) = self
                    .config
                    .agent_command
                    .split_first()
                    .ok_or_else(|| anyhow::anyhow!("CONDUIT_ACP_COMMAND must name an executable"))?;
                let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
                let (transport, child) = spawn_subprocess(command, args, &cwd, &[])?;
                let review_opts = ReviewOptions { auto_permission: true, suppress_tool_events: true };
                let session = AcpSession::new(
                    transport,
                    tool_states.clone(),
                    file_changes.clone(),
                    events_tx.clone(),
                    None,
                    review_opts,
                )
                .await;
                session.attach_child(child);
                session.initialize().await?;
                session.new_session(&cwd.to_string_lossy(), vec![self.ask_user_mcp_server()]).await?;
                BackendSession::Acp(session)
            }
            Backend::Anthropic => {
                let provider = conduit_model::from_config(&self.config)?;
                let registry = Arc::new(default_registry());
                // All-allow so the ephemeral review session never blocks on a
                // permission decision nobody is watching for (§4.9 "review mode").
                for name in ["Read", "Write", "Edit", "Bash", "Glob", "Grep"] {
                    permission_layer.set_rule(name, conduit_permission::ApprovalPolicy::Allow);
                }
                let session = DirectSession::new(
                    provider,
                    registry,
                    permission_layer.clone(),
                    tool_states.clone(),
                    file_changes.clone(),
                    events_tx.clone(),
                );
                BackendSession::Direct(session)
            }
        };

        self.spawn_bridge(review_session.clone(), events_rx, true);

        let result = backend.send_prompt(&prompt).await;
        backend.close().await;

        self.publish(PresentationEvent::Session {
            id: active_id,
            topic: "review_agent_complete".to_string(),
            payload: serde_json::Value::Null,
        })
        .await;

        result.map(|_| ())
    }

    /// Shuts down the process-wide "ask user" MCP server. Call once at
    /// process exit; individual session closes never touch it.
    pub fn shutdown_mcp(&self) {
        self.mcp_shutdown.cancel();
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
