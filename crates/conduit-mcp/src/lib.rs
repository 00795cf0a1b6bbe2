// SPDX-License-Identifier: MIT
//! The in-process "ask user" MCP server (spec §4.8).
//!
//! Exposes exactly one tool, `ask_user_question`, to the ACP agent over
//! Server-Sent Events on a loopback socket with an ephemeral port. Answers
//! arrive asynchronously from the presentation layer via [`AskUserState::answer`];
//! invocations block on a single-use response slot keyed by a generated
//! request id.

mod bridge;
pub mod server;

pub use server::AskUserServer;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rmcp::transport::sse_server::SseServer;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Published to the presentation layer when the agent calls `ask_user_question`.
#[derive(Debug, Clone)]
pub struct UserQuestionRequest {
    pub id: String,
    pub question: String,
    pub options: Vec<QuestionOption>,
}

/// Bridges the MCP tool invocation to the presentation layer and back.
///
/// One instance is shared by the MCP server (which calls [`Self::ask`]) and
/// the supervisor's `user_answer` input handler (which calls [`Self::answer`]).
pub struct AskUserState {
    question_tx: mpsc::Sender<UserQuestionRequest>,
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl AskUserState {
    pub fn new(question_tx: mpsc::Sender<UserQuestionRequest>) -> Arc<Self> {
        Arc::new(Self { question_tx, pending: Mutex::new(HashMap::new()) })
    }

    /// Generates a request id, publishes the question, and blocks until
    /// [`Self::answer`] is called for that id.
    pub async fn ask(&self, question: String, options: Vec<QuestionOption>) -> String {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);

        if self
            .question_tx
            .send(UserQuestionRequest { id: id.clone(), question, options })
            .await
            .is_err()
        {
            self.pending.lock().unwrap().remove(&id);
            return "the question channel is closed; no answer available".to_string();
        }

        match rx.await {
            Ok(answer) => answer,
            Err(_) => {
                warn!(request_id = %id, "ask_user_question slot dropped without an answer");
                "the user did not answer".to_string()
            }
        }
    }

    /// Delivers `answer` into the slot for `request_id`. A lost or duplicate
    /// response (no matching slot) is dropped rather than blocking future
    /// questions.
    pub fn answer(&self, request_id: &str, answer: String) {
        if let Some(tx) = self.pending.lock().unwrap().remove(request_id) {
            let _ = tx.send(answer);
        }
    }
}

/// Starts the SSE server on a loopback socket with an ephemeral port and
/// returns the bound address plus a token that shuts the server down when
/// cancelled. The returned address is what gets registered with the ACP
/// session as an MCP server.
pub async fn serve_sse(state: Arc<AskUserState>) -> anyhow::Result<(SocketAddr, CancellationToken)> {
    // `SseServer::serve` wants a concrete address, not port 0, so probe the OS
    // for an unused loopback port first and reuse it immediately. The window
    // between releasing `probe` and rebinding is negligible in practice.
    let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
    let bound_addr = probe.local_addr()?;
    drop(probe);

    let sse_server = SseServer::serve(bound_addr).await?;
    let ct = sse_server.with_service(move || AskUserServer::new(state.clone()));

    Ok((bound_addr, ct))
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
