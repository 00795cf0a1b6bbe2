// SPDX-License-Identifier: MIT
//! A [`PermissionEventSink`] that mirrors a permission request into a
//! session's own event channel and tool-state store — the same shape
//! `conduit_acp::AcpSession`'s fallback path and `conduit_direct::DirectSession`'s
//! tool loop already produce inline, factored out here so one [`PermissionLayer`]
//! can be shared by either backend (§4.7).
//!
//! [`PermissionLayer`]: conduit_permission::PermissionLayer

use std::sync::Arc;

use async_trait::async_trait;
use conduit_permission::PermissionEventSink;
use conduit_state::{Event, PermissionOption, PermissionRequestPayload, ToolCallStatus, ToolStateStore};
use tokio::sync::mpsc;

pub struct ForwardingPermissionSink {
    pub tool_states: Arc<ToolStateStore>,
    pub events: mpsc::Sender<Event>,
}

#[async_trait]
impl PermissionEventSink for ForwardingPermissionSink {
    async fn emit_permission_request(&self, tool_call_id: &str, tool_name: &str, options: &[PermissionOption]) {
        if let Some(state) = self.tool_states.update(tool_call_id, |s| {
            s.status = ToolCallStatus::AwaitingPermission;
            s.permission_options = options.to_vec();
        }) {
            let _ = self.events.send(Event::ToolState(state)).await;
        }
        let _ = self
            .events
            .send(Event::PermissionRequest(PermissionRequestPayload {
                tool_call_id: tool_call_id.to_string(),
                tool_name: tool_name.to_string(),
                options: options.to_vec(),
            }))
            .await;
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
