// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolKind, ToolOutput};

/// Whole-file reads stop here; the caller narrows with start_line/end_line.
const MAX_LINES: usize = 2000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file. Lines come back 1-indexed as L{n}:content.\n\
         Optional start_line/end_line select an inclusive range.\n\
         Without a range, files over 2000 lines are cut at L2000 with a tail\n\
         marker naming how many lines were omitted; pass a range to read on.\n\
         Use grep to locate the relevant region first, then read only that."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "start_line": {
                    "type": "integer",
                    "description": "1-based first line of the range (inclusive)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "1-based last line of the range (inclusive)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn execute(&self, args: &Value) -> anyhow::Result<ToolOutput> {
        let path = require_str(args, "path")?;
        let start_line = args.get("start_line").and_then(|v| v.as_u64()).map(|n| n as usize);
        let end_line = args.get("end_line").and_then(|v| v.as_u64()).map(|n| n as usize);

        debug!(path = %path, ?start_line, ?end_line, "read_file tool");

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("cannot read {path}: {e}"))?;
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();

        let (first, last, ranged) = match (start_line, end_line) {
            (None, None) => (1, total.min(MAX_LINES), false),
            (s, e) => {
                let first = s.unwrap_or(1).max(1);
                let last = e.unwrap_or(total).min(total);
                (first, last, true)
            }
        };

        if first > last || first > total {
            return Ok(ToolOutput::text(format!(
                "(no lines in range L{first}-L{} of {total})",
                end_line.unwrap_or(total)
            )));
        }

        let mut out: Vec<String> = lines[first - 1..last]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("L{}:{}", first + i, line))
            .collect();

        if !ranged && total > MAX_LINES {
            out.push(format!(
                "...[truncated: {} more lines; pass start_line/end_line to read beyond L{MAX_LINES}]",
                total - MAX_LINES
            ));
        }

        Ok(ToolOutput::text(out.join("\n")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
