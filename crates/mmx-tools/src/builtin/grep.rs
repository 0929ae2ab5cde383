// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{require_str, Tool, ToolKind, ToolOutput};

const MAX_MATCHES: usize = 200;

static EXCLUDED_DIRS: &[&str] = &[".git", "node_modules"];

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Regex search over file contents. Matches come back as path:line: text,\n\
         200 matches max. Dotfiles, .git/ and node_modules/ are skipped.\n\
         include: restrict to one file extension (e.g. 'rs' or '*.rs').\n\
         context_lines: lines of surrounding context per match (default 0).\n\
         Know the file already? Use read_file with a range instead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (default: current directory)"
                },
                "include": {
                    "type": "string",
                    "description": "File extension filter, e.g. 'rs' or '*.rs'"
                },
                "context_lines": {
                    "type": "integer",
                    "description": "Context lines before and after each match (default 0)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn execute(&self, args: &Value) -> anyhow::Result<ToolOutput> {
        let pattern = require_str(args, "pattern")?.to_string();
        let root = args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let include = args
            .get("include")
            .and_then(|v| v.as_str())
            .map(|s| s.trim_start_matches("*.").trim_start_matches('.').to_string());
        let context_lines = args
            .get("context_lines")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;

        debug!(pattern = %pattern, root = %root, ?include, "grep tool");

        let re = Regex::new(&pattern)
            .map_err(|e| anyhow::anyhow!("invalid regex: {e}"))?;

        let output = tokio::task::spawn_blocking(move || {
            search(&re, &root, include.as_deref(), context_lines)
        })
        .await?;

        if output.is_empty() {
            return Ok(ToolOutput::text("(no matches)"));
        }
        Ok(ToolOutput::text(output))
    }
}

fn search(re: &Regex, root: &str, include: Option<&str>, context_lines: usize) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut match_count = 0usize;
    let mut capped = false;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0
                || (!name.starts_with('.') && !EXCLUDED_DIRS.contains(&name.as_ref()))
        });

    'files: for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(ext) = include {
            let matches_ext = entry
                .path()
                .extension()
                .map(|e| e.to_string_lossy() == ext)
                .unwrap_or(false);
            if !matches_ext {
                continue;
            }
        }
        // Binary or non-UTF-8 files are simply skipped.
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .trim_start_matches('/')
            .to_string();
        let lines: Vec<&str> = text.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if !re.is_match(line) {
                continue;
            }
            if match_count >= MAX_MATCHES {
                capped = true;
                break 'files;
            }
            match_count += 1;
            if context_lines == 0 {
                blocks.push(format!("{rel}:{}: {line}", idx + 1));
            } else {
                let first = idx.saturating_sub(context_lines);
                let last = (idx + context_lines).min(lines.len() - 1);
                let mut block = String::new();
                for (n, ctx) in lines.iter().enumerate().take(last + 1).skip(first) {
                    let sep = if n == idx { ':' } else { '-' };
                    block.push_str(&format!("{rel}{sep}{}{sep} {ctx}\n", n + 1));
                }
                blocks.push(block.trim_end().to_string());
            }
        }
    }

    let joiner = if context_lines == 0 { "\n" } else { "\n--\n" };
    let mut out = blocks.join(joiner);
    if capped {
        out.push_str(&format!("\n...[match cap of {MAX_MATCHES} reached]"));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
