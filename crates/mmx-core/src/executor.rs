// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;
use tracing::debug;

use mmx_config::AgentMode;
use mmx_mcp::McpBridge;
use mmx_model::{CancelToken, ToolCall};
use mmx_tools::{Lookup, ToolKind, ToolRegistry};

/// Outcome of one dispatch.  Failures are text, never errors: the loop
/// always gets something it can append as a tool result.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub result: String,
    pub preview: Option<Value>,
    pub is_error: bool,
}

impl ToolExecution {
    fn ok(result: String, preview: Option<Value>) -> Self {
        Self {
            result,
            preview,
            is_error: false,
        }
    }

    fn err(result: String) -> Self {
        Self {
            result,
            preview: None,
            is_error: true,
        }
    }
}

/// Dispatch one tool call.
///
/// The arguments string decodes to a JSON object or falls back to `{}` (the
/// tool does its own validation).  Unknown names, PLAN-mode denials, and
/// tool failures all come back as textual results so the conversation loop
/// keeps going; only the transcript records the problem.
pub async fn execute_tool(
    registry: &ToolRegistry,
    bridge: Option<&McpBridge>,
    call: &ToolCall,
    mode: AgentMode,
    cancel: &CancelToken,
) -> ToolExecution {
    let args: Value = match serde_json::from_str::<Value>(&call.arguments) {
        Ok(v) if v.is_object() => v,
        _ => {
            debug!(tool = %call.name, "arguments not a JSON object; using {{}}");
            Value::Object(Default::default())
        }
    };

    match registry.lookup(&call.name) {
        Lookup::External { server, tool } => {
            let Some(bridge) = bridge else {
                return ToolExecution::err(format!(
                    "Error: external server '{server}' is not configured"
                ));
            };
            let mut cancel = cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => ToolExecution::err("Error: cancelled".into()),
                outcome = bridge.call_tool(&server, &tool, args) => match outcome {
                    Ok(text) => ToolExecution::ok(text, None),
                    Err(e) => ToolExecution::err(format!("Error: {e:#}")),
                },
            }
        }
        Lookup::None => {
            ToolExecution::err(format!("Error: unknown tool \"{}\"", call.name))
        }
        Lookup::Builtin(tool) => {
            if mode == AgentMode::Plan && tool.kind() == ToolKind::Mutating {
                return ToolExecution::err(format!(
                    "Error: Tool \"{}\" is not available in PLAN mode. \
                     Only read-only tools may run here; switch to BUILDER mode \
                     to make changes.",
                    call.name
                ));
            }
            let mut cancel = cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => ToolExecution::err("Error: cancelled".into()),
                outcome = tool.execute(&args) => match outcome {
                    Ok(output) => ToolExecution::ok(output.result, output.meta),
                    Err(e) => ToolExecution::err(format!("Error: {e}")),
                },
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
