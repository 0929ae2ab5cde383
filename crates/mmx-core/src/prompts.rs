// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use mmx_config::AgentMode;

/// Build the system prompt for one request.
///
/// Recomputed every round: it depends on the current mode and the working
/// directory snapshot, and `agent.md` may change between turns.  When the
/// cwd holds an `agent.md`, its contents are appended under a marker header.
pub fn system_prompt(mode: AgentMode, cwd: &Path) -> String {
    let mut prompt = String::from(base_prompt(mode));
    prompt.push_str(&format!("\n\nWorking directory: {}\n", cwd.display()));

    let agent_md = cwd.join("agent.md");
    if let Ok(contents) = std::fs::read_to_string(&agent_md) {
        prompt.push_str("\n--- agent.md ---\n");
        prompt.push_str(&contents);
    }

    prompt
}

fn base_prompt(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Builder => {
            "You are mmx, a coding agent working in the user's terminal.\n\
             \n\
             Guidelines:\n\
             - Be concise and precise. Use tools instead of guessing.\n\
             - Read the relevant code before changing it; keep edits minimal.\n\
             - Prefer edit_file over write_file for existing files.\n\
             - Never use bash for file work covered by the dedicated tools.\n\
             - After mutating files, verify the result with a read or a build."
        }
        AgentMode::Plan => {
            "You are mmx, a coding agent working in the user's terminal, \
             currently in PLAN mode.\n\
             \n\
             PLAN mode is read-only: explore the codebase with the available \
             read-only tools and produce analysis and a concrete plan. Do not \
             attempt to modify files or run commands; mutating tools are \
             unavailable and will refuse."
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
