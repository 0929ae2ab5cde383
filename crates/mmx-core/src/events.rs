// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

use mmx_model::ToolCallSnapshot;

/// Outcome of one tool execution as surfaced to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Done,
    Error,
}

/// One-way event stream from the engine to its single consumer.
///
/// Delivery is ordered and lossless within a turn; the channel is bounded,
/// so a slow consumer blocks the engine instead of growing a buffer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A model round is starting.
    StreamStart,
    ReasoningDelta(String),
    ContentDelta(String),
    /// Cumulative snapshot of one in-flight tool call.
    ToolCallSnapshot(ToolCallSnapshot),
    /// The assistant message was persisted under this sequence number.
    AssistantFinalized { message_id: i64 },
    ToolStart {
        call_id: String,
        name: String,
    },
    ToolEnd {
        call_id: String,
        status: ToolStatus,
        preview: Option<Value>,
    },
    /// Cumulative reported token usage for the session.
    TokenUsage { total: u64 },
    SystemNotice(String),
    Error(String),
    /// The user turn is over; control returns to the input source.
    TurnDone,
}
