// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{json, Value};

use crate::types::{Message, Role, ToolSchema};

/// Build the chat-completions request body from the transcript.
///
/// Free function so the wire format can be unit-tested without HTTP.
/// Assistant messages with tool calls carry them as a `tool_calls` array;
/// stored `reasoning_details` blobs are echoed back verbatim.  Temperature
/// is fixed at 1.0 and `tool_choice` is `"auto"` whenever tools are sent.
pub fn build_request_body(model: &str, messages: &[Message], tools: &[ToolSchema]) -> Value {
    let wire_messages: Vec<Value> = messages.iter().map(message_to_json).collect();

    let mut body = json!({
        "model": model,
        "messages": wire_messages,
        "stream": true,
        "temperature": 1.0,
    });

    if !tools.is_empty() {
        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(wire_tools);
        body["tool_choice"] = json!("auto");
    }

    body
}

fn message_to_json(m: &Message) -> Value {
    match m.role {
        Role::System => json!({ "role": "system", "content": m.content }),
        Role::User => json!({ "role": "user", "content": m.content }),
        Role::Assistant => {
            let mut v = json!({ "role": "assistant", "content": m.content });
            if !m.tool_calls.is_empty() {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments },
                        })
                    })
                    .collect();
                v["tool_calls"] = json!(calls);
            }
            if let Some(details) = &m.reasoning_details {
                v["reasoning_details"] = details.clone();
            }
            v
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "name": m.name.clone().unwrap_or_default(),
            "content": m.content,
        }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
