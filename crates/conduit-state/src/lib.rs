// SPDX-License-Identifier: MIT
//! In-memory, concurrency-safe state shared by a session: tool-call lifecycle
//! tracking and per-file change coalescing.
//!
//! Both stores are internally synchronized; callers need no external
//! locking. Neither ever removes an entry implicitly — state accumulates for
//! the session's lifetime and is dropped only when the session itself is.

mod event;
mod file_change;
mod patch;
mod tool_state;

pub use event::{Event, PermissionRequestPayload, PlanEntry, PlanEntryStatus, PlanPriority};
pub use file_change::{FileChange, FileChangeStore};
pub use patch::{diff_hunks, format_unified_diff, parse_unified_diff, HunkLine, PatchHunk};
pub use tool_state::{PermissionOption, ToolCallState, ToolCallStatus, ToolKind, ToolStateStore};
