// SPDX-License-Identifier: MIT
//! ACP backend (§4.5): drives an external agent subprocess that speaks the
//! Agent Client Protocol over [`conduit_rpc::Transport`].

mod adapter;
mod process;
mod session;

pub use adapter::{
    canonical_tool_name, default_chain, resolve, ClaudeCodeAdapter, GenericAdapter, StructuredToolResponse,
    ToolUpdateAdapter,
};
pub use process::spawn_subprocess;
pub use session::{AcpError, AcpSession, AcpSessionState, ReviewOptions, ASK_USER_TOOL_NAME};
