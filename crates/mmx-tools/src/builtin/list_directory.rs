// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolKind, ToolOutput};

static EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__"];

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "Show a directory tree. depth: default 2, max 5. Directories end with /;\n\
         files show a human-readable size. .git/ node_modules/ target/ are\n\
         skipped. For pattern search use glob; for content search use grep."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: current directory)"
                },
                "depth": {
                    "type": "integer",
                    "description": "Maximum recursion depth (default 2, max 5)"
                }
            },
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn execute(&self, args: &Value) -> anyhow::Result<ToolOutput> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let depth = args
            .get("depth")
            .and_then(|v| v.as_u64())
            .unwrap_or(2)
            .min(5) as usize;

        debug!(path = %path, depth, "list_directory tool");

        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => anyhow::bail!("not a directory: {path}"),
            Err(e) => anyhow::bail!("cannot access {path}: {e}"),
        }

        let mut lines: Vec<String> = Vec::new();
        collect(&path, 0, depth, &mut lines).await;

        if lines.is_empty() {
            return Ok(ToolOutput::text("(empty directory)"));
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }
}

#[async_recursion::async_recursion]
async fn collect(dir: &str, level: usize, max_depth: usize, lines: &mut Vec<String>) {
    let Ok(mut rd) = tokio::fs::read_dir(dir).await else {
        return;
    };

    let mut entries: Vec<(String, bool, u64)> = Vec::new();
    while let Ok(Some(entry)) = rd.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if EXCLUDED_DIRS.contains(&name.as_str()) {
            continue;
        }
        let meta = entry.metadata().await.ok();
        let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
        let size = meta.map(|m| m.len()).unwrap_or(0);
        entries.push((name, is_dir, size));
    }
    // Directories first, then files, each alphabetical.
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let indent = "  ".repeat(level);
    for (name, is_dir, size) in entries {
        if is_dir {
            lines.push(format!("{indent}{name}/"));
            if level + 1 < max_depth {
                let child = format!("{}/{}", dir.trim_end_matches('/'), name);
                collect(&child, level + 1, max_depth, lines).await;
            }
        } else {
            lines.push(format!("{indent}{name}  ({})", human_size(size)));
        }
    }
}

/// Render a byte count the way humans read it: `512 B`, `1.2 KB`, `3.4 MB`.
fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
