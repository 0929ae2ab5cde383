// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::{ExternalToolInfo, Lookup, ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolKind, ToolOutput};

pub use builtin::bash::BashTool;
pub use builtin::edit_file::EditFileTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::list_directory::ListDirectoryTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::web_search::WebSearchTool;
pub use builtin::write_file::WriteFileTool;

use crate::registry::ToolRegistry as Registry;

/// Register the full built-in tool set.
pub fn builtin_registry(search_endpoint: Option<String>) -> Registry {
    let mut reg = Registry::new();
    reg.register(ReadFileTool);
    reg.register(WriteFileTool);
    reg.register(EditFileTool);
    reg.register(GlobTool);
    reg.register(GrepTool);
    reg.register(ListDirectoryTool);
    reg.register(BashTool::default());
    reg.register(WebSearchTool {
        endpoint: search_endpoint,
    });
    reg
}
