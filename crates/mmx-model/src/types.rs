// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured request by the model to invoke a named tool.
///
/// `arguments` is a JSON-encoded object and stays a string until dispatch;
/// the engine never inspects it earlier.  For calls recovered from embedded
/// XML the id is synthesized as `xml_tc_<millis>_<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One transcript record.
///
/// The role decides which of the optional fields are meaningful: assistants
/// carry `reasoning` / `reasoning_details` / `tool_calls`, tool results carry
/// `tool_call_id` / `name` / `preview`.  `preview` is rendering metadata and
/// is never sent to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Opaque blobs echoed back to the server on the next turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_details: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Value>,
}

impl Message {
    fn bare(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning: None,
            reasoning_details: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            preview: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::bare(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::bare(Role::User, text)
    }

    /// User message with attached file context.  Each attachment is
    /// materialized verbatim as a bracketed block carrying its path, after
    /// the free text.
    pub fn user_with_files<'a>(
        text: impl Into<String>,
        files: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut content = text.into();
        for (path, body) in files {
            content.push_str(&format!("\n\n[file path=\"{path}\"]\n{body}\n[/file]"));
        }
        Self::bare(Role::User, content)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::bare(Role::Assistant, text)
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut m = Self::bare(Role::Tool, content);
        m.tool_call_id = Some(call_id.into());
        m.name = Some(tool_name.into());
        m
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// Token usage reported by the server.  Each `usage` field on a chunk
/// replaces the previous snapshot wholesale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Classification of a stream-terminating failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// TCP/TLS failure, non-success HTTP status, or malformed SSE framing.
    Transport,
    /// In-band `error` object on a chunk.
    Api,
    /// The stream produced no chunks, no content, and no tool calls.
    EmptyResponse,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Api => write!(f, "api"),
            ErrorKind::EmptyResponse => write!(f, "empty response"),
        }
    }
}

/// Cumulative view of one tool call under construction, keyed by the
/// stream-assigned index.  Every delta for the index re-emits the full
/// snapshot so consumers can upsert instead of concatenating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallSnapshot {
    pub index: u32,
    pub id: String,
    pub name: String,
    /// Arguments accumulated so far; may be an open JSON fragment.
    pub arguments: String,
}

/// One event from the streaming client.
///
/// The sequence is: zero or more chunk events, then exactly one terminal
/// `Done` or `Error` (an `EmptyResponse` error precedes its `Done`).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ReasoningChunk(String),
    ContentChunk(String),
    ToolCallDelta(ToolCallSnapshot),
    Done {
        usage: Usage,
        finish_reason: Option<String>,
        /// Accumulated opaque reasoning blobs for the history echo.
        reasoning_details: Option<Value>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
