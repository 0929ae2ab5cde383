// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolKind, ToolOutput};

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of old_str with new_str in a file.\n\
         old_str must match the file content exactly (including whitespace)\n\
         and exactly once. When it matches zero or several locations the edit\n\
         is rejected and nothing is written; add surrounding lines to old_str\n\
         until it is unique. Re-read the file after a previous edit before\n\
         building new context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to edit"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace; must occur exactly once"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_str", "new_str"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mutating
    }

    async fn execute(&self, args: &Value) -> anyhow::Result<ToolOutput> {
        let path = require_str(args, "path")?.to_string();
        let old_str = require_str(args, "old_str")?.to_string();
        let new_str = require_str(args, "new_str")?.to_string();

        if old_str.is_empty() {
            anyhow::bail!("old_str must not be empty");
        }

        debug!(path = %path, "edit_file tool");

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("cannot read {path}: {e}"))?;

        let count = content.matches(&old_str).count();
        if count != 1 {
            anyhow::bail!(
                "old_str found {count} times in {path}. \
                 It must match exactly one location; include more surrounding \
                 context to make it unique, then retry."
            );
        }

        let new_content = content.replacen(&old_str, &new_str, 1);
        tokio::fs::write(&path, &new_content)
            .await
            .map_err(|e| anyhow::anyhow!("cannot write {path}: {e}"))?;

        Ok(ToolOutput::with_meta(
            format!("edited {path}"),
            json!({ "path": path, "old_str": old_str, "new_str": new_str }),
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
