// SPDX-License-Identifier: MIT
//! End-to-end wiring tests for the root binary's dependency graph: the
//! supervisor driving a real backend session rather than a crate-local
//! double. The ACP backend's own protocol scenarios live in
//! `conduit-acp`; the direct-API tool loop's in `conduit-direct`. This file
//! only exercises what is unique to assembling them behind one supervisor.

use std::sync::Arc;
use std::time::Duration;

use conduit_config::{Backend, Config};
use conduit_supervisor::{PresentationEvent, Supervisor};

fn direct_backend_config() -> Arc<Config> {
    Arc::new(Config {
        backend: Backend::Anthropic,
        vendor_api_key: Some("sk-test-not-a-real-key".into()),
        model_name: "test-model".into(),
        request_timeout: Duration::from_secs(30),
        shell_override: None,
        agent_command: vec!["unused".into()],
    })
}

#[tokio::test]
async fn supervisor_wires_a_direct_backend_session_end_to_end() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let (supervisor, _questions) = Supervisor::new(direct_backend_config(), tx).await.unwrap();

    let id = supervisor.create_session("root-wiring-test", ".").await.unwrap();
    assert_eq!(supervisor.active_session(), Some(id.clone()));

    let mut saw_sessions_updated = false;
    let mut saw_active_changed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            PresentationEvent::SessionsUpdated { .. } => saw_sessions_updated = true,
            PresentationEvent::ActiveSessionChanged { id: changed } if changed == id => saw_active_changed = true,
            _ => {}
        }
    }
    assert!(saw_sessions_updated, "creating a session must publish sessions_updated");
    assert!(saw_active_changed, "creating a session must publish active_session_changed");

    supervisor.close_session(&id).await;
    assert!(supervisor.sessions().is_empty());
    supervisor.shutdown_mcp();
}

#[tokio::test]
async fn permission_response_with_no_pending_request_is_a_noop() {
    let (tx, _rx) = tokio::sync::mpsc::channel(64);
    let (supervisor, _questions) = Supervisor::new(direct_backend_config(), tx).await.unwrap();
    supervisor.create_session("root-wiring-test", ".").await.unwrap();

    // Nothing is awaiting a decision yet; answering must not panic or error.
    supervisor.permission_response("allow").unwrap();
    supervisor.shutdown_mcp();
}
