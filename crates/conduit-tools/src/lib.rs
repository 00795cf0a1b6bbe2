// SPDX-License-Identifier: MIT
//! The local tool executor: a registry of named tools (`Read`, `Write`,
//! `Edit`, `Bash`, `Glob`, `Grep`) sharing the uniform [`Tool`] contract.

pub mod builtin;
mod registry;
mod tool;

pub use builtin::edit_file::EditFileTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::shell::BashTool;
pub use builtin::write::WriteTool;
pub use registry::{ToolNotFound, ToolRegistry};
pub use tool::{Tool, ToolResult, ToolSchema};

/// Build a registry pre-populated with the six local tools.
pub fn default_registry() -> ToolRegistry {
    use std::sync::Arc;
    let mut reg = ToolRegistry::new();
    reg.register(Arc::new(ReadFileTool));
    reg.register(Arc::new(WriteTool));
    reg.register(Arc::new(EditFileTool));
    reg.register(Arc::new(BashTool));
    reg.register(Arc::new(GlobTool));
    reg.register(Arc::new(GrepTool));
    reg
}
