// SPDX-License-Identifier: MIT
use serde::Serialize;

/// One row of `sessions_updated` (§6.4): everything the presentation layer
/// needs to render a session picker without querying each session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub mode_id: Option<String>,
}

/// One entry of `submit_review`'s inbound comment list (§6.4).
#[derive(Debug, Clone)]
pub struct ReviewComment {
    pub id: String,
    pub comment_type: String,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub hunk_index: Option<u32>,
    pub text: String,
}

/// Every event the presentation layer can receive (§6.4), both the global
/// ones and the per-session ones already prefixed `session:<id>:`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PresentationEvent {
    SessionsUpdated { sessions: Vec<SessionSummary> },
    ActiveSessionChanged { id: String },
    UserQuestion { request_id: String, question: String, options: Vec<conduit_mcp::QuestionOption> },
    Error { message: String },
    /// A per-session event named `session:<id>:<topic>` in the wire contract;
    /// kept as one variant with an explicit `topic` field rather than one
    /// variant per topic so the bridge can be data-driven (§4.7 fan-out).
    Session { id: String, topic: String, payload: serde_json::Value },
}
