// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolKind, ToolOutput};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file, overwriting any existing content. Parent directories\n\
         are created automatically and the replacement is atomic: readers\n\
         never observe a half-written file.\n\
         Prefer edit_file for changing part of an existing file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Complete new content of the file"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mutating
    }

    async fn execute(&self, args: &Value) -> anyhow::Result<ToolOutput> {
        let path = require_str(args, "path")?.to_string();
        let content = require_str(args, "content")?.to_string();

        debug!(path = %path, bytes = content.len(), "write_file tool");

        let target = std::path::PathBuf::from(&path);
        let is_new = !target.exists();

        // Blocking section: create parents, then write to a temp file in the
        // target directory and rename over.  Rename within one directory is
        // atomic on POSIX, which is what makes the overwrite atomic.
        let preview_content = content.clone();
        let written = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let parent = match target.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => std::path::PathBuf::from("."),
            };
            std::fs::create_dir_all(&parent)?;
            let tmp = tempfile::NamedTempFile::new_in(&parent)?;
            std::fs::write(tmp.path(), content.as_bytes())?;
            tmp.persist(&target)
                .map_err(|e| anyhow::anyhow!("rename failed: {}", e.error))?;
            Ok(content.len())
        })
        .await??;

        Ok(ToolOutput::with_meta(
            format!("wrote {written} bytes to {path}"),
            json!({ "path": path, "content": preview_content, "is_new": is_new }),
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
