// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{require_str, Tool, ToolKind, ToolOutput};

const MAX_RESULTS: usize = 500;

static EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", "target"];

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. Supports ** / * / ?.\n\
         A pattern without a slash matches file names at any depth; with a\n\
         slash it matches the path relative to cwd.\n\
         Dotfiles and .git/ node_modules/ target/ are skipped. 500 results max.\n\
         Examples: *.rs | src/**/*.rs | Cargo.?oml\n\
         For content search use grep; for structure use list_directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. '*.rs' or 'src/**/*.ts'"
                },
                "cwd": {
                    "type": "string",
                    "description": "Directory to search from (default: current directory)"
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
        let cwd = args
            .get("cwd")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();

        debug!(pattern = %pattern, cwd = %cwd, "glob tool");

        let re = glob_to_regex(&pattern)
            .ok_or_else(|| anyhow::anyhow!("invalid glob pattern: {pattern}"))?;
        let name_only = !pattern.contains('/');

        let output = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            let mut capped = false;
            let walker = WalkDir::new(&cwd)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    // Keep the search root itself even when it is hidden
                    // (e.g. cwd "."); prune hidden entries below it.
                    e.depth() == 0
                        || (!name.starts_with('.') && !EXCLUDED_DIRS.contains(&name.as_ref()))
                });
            for entry in walker.filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let candidate = if name_only {
                    entry.file_name().to_string_lossy().into_owned()
                } else {
                    relative_to(&cwd, entry.path())
                };
                if re.is_match(&candidate) {
                    if matches.len() >= MAX_RESULTS {
                        capped = true;
                        break;
                    }
                    matches.push(relative_to(&cwd, entry.path()));
                }
            }
            matches.sort();
            (matches, capped)
        })
        .await?;

        let (matches, capped) = output;
        if matches.is_empty() {
            return Ok(ToolOutput::text("(no matches)"));
        }
        let mut text = matches.join("\n");
        if capped {
            text.push_str(&format!("\n...[result cap of {MAX_RESULTS} reached]"));
        }
        Ok(ToolOutput::text(text))
    }
}

fn relative_to(base: &str, path: &std::path::Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .trim_start_matches('/')
        .to_string()
}

/// Translate a glob pattern to an anchored [`Regex`].
///
/// `**` crosses directory separators, `*` stays within one path segment,
/// `?` matches a single non-separator character.
pub(crate) fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let bytes: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            '*' => {
                if bytes.get(i + 1) == Some(&'*') {
                    // "**/" may match zero directories; bare "**" matches anything.
                    if bytes.get(i + 2) == Some(&'/') {
                        re.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        re.push_str(".*");
                        i += 2;
                    }
                } else {
                    re.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                re.push_str("[^/]");
                i += 1;
            }
            c => {
                re.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
