// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod mock;
mod provider;
mod quota;
mod state;
mod types;
mod wire;

pub use client::MiniMaxClient;
pub use mock::MockProvider;
pub use provider::{CancelHandle, CancelToken, CompletionRequest, ModelProvider, StreamHandle};
pub use quota::QuotaSnapshot;
pub use state::{StreamState, ToolCallDraft};
pub use types::{
    ErrorKind, Message, Role, StreamEvent, ToolCall, ToolCallSnapshot, ToolSchema, Usage,
};
pub use wire::build_request_body;
