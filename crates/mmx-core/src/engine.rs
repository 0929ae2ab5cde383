// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use mmx_config::AgentMode;
use mmx_mcp::McpBridge;
use mmx_model::{
    CancelToken, CompletionRequest, ErrorKind, Message, ModelProvider, StreamEvent, StreamState,
    ToolCall, ToolSchema, Usage,
};
use mmx_store::{HistoryStore, SessionRecord};
use mmx_tools::ToolRegistry;

use crate::budget::{BudgetSignal, TokenBudget, HARD_CAP_TOKENS};
use crate::events::{EngineEvent, ToolStatus};
use crate::executor::execute_tool;
use crate::parser::parse_stream_text;
use crate::prompts::system_prompt;

/// The conversation loop.  Owns the current session and drives the
/// model ↔ tool round trip; everything the UI needs arrives on the event
/// channel, everything durable goes through the history store.
pub struct Engine {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    bridge: Option<Arc<McpBridge>>,
    store: Arc<HistoryStore>,
    session: SessionRecord,
    /// In-memory mirror of the persisted transcript (system excluded).
    history: Vec<Message>,
    mode: AgentMode,
    cwd: PathBuf,
    events: mpsc::Sender<EngineEvent>,
    budget: TokenBudget,
}

/// Everything one model round leaves behind.
struct Round {
    tool_calls: Vec<ToolCall>,
    stream_error: Option<(ErrorKind, String)>,
    cancelled: bool,
    usage: Usage,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        bridge: Option<Arc<McpBridge>>,
        store: Arc<HistoryStore>,
        events: mpsc::Sender<EngineEvent>,
        mode: AgentMode,
        cwd: PathBuf,
    ) -> anyhow::Result<Self> {
        let session = store.create_session(provider.model_name())?;
        Ok(Self {
            provider,
            tools,
            bridge,
            store,
            session,
            history: Vec::new(),
            mode,
            cwd,
            events,
            budget: TokenBudget::new(),
        })
    }

    pub fn session(&self) -> &SessionRecord {
        &self.session
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: AgentMode) {
        self.mode = mode;
    }

    /// Run one user turn to completion.
    ///
    /// Returns when the turn reaches a terminal state: a tool-free assistant
    /// message, a stream error, or cancellation.  The transcript is coherent
    /// at every return: assistant tool calls without executed results get
    /// synthesized failures.
    pub async fn submit(&mut self, user_input: &str, cancel: CancelToken) -> anyhow::Result<()> {
        if self.budget.is_exhausted() {
            self.roll_session()?;
        }

        self.persist(Message::user(user_input))?;
        // The store retitles on the first user message; pick that up.
        self.session = self.store.get_session(&self.session.id)?;

        loop {
            let round = self.run_round(&cancel).await?;

            let signal = self.budget.add(round.usage.total_tokens);
            self.emit(EngineEvent::TokenUsage {
                total: self.budget.total(),
            })
            .await;
            match signal {
                BudgetSignal::SoftWarn => {
                    self.emit(EngineEvent::SystemNotice(format!(
                        "approaching the token budget: {} of {HARD_CAP_TOKENS} tokens used",
                        self.budget.total()
                    )))
                    .await;
                }
                BudgetSignal::Exhausted => {
                    self.emit(EngineEvent::SystemNotice(format!(
                        "token budget exceeded ({} tokens); a fresh session starts \
                         before the next input",
                        self.budget.total()
                    )))
                    .await;
                }
                BudgetSignal::Ok => {}
            }

            if let Some((_, message)) = &round.stream_error {
                self.synthesize_failed_results(&round.tool_calls, "Error: stream aborted")
                    .await?;
                self.emit(EngineEvent::Error(message.clone())).await;
                break;
            }

            if round.cancelled {
                self.synthesize_failed_results(
                    &round.tool_calls,
                    "Error: cancelled before execution",
                )
                .await?;
                break;
            }

            if round.tool_calls.is_empty() {
                break;
            }

            self.run_tools(&round.tool_calls, &cancel).await?;
        }

        self.emit(EngineEvent::TurnDone).await;
        Ok(())
    }

    // ── One model round ───────────────────────────────────────────────────────

    async fn run_round(&mut self, cancel: &CancelToken) -> anyhow::Result<Round> {
        self.emit(EngineEvent::StreamStart).await;

        let request = CompletionRequest {
            messages: self.request_messages(),
            tools: self.schemas(),
        };

        let mut rx = self.provider.stream(request, cancel.clone()).await;
        let mut state = StreamState::default();
        let mut stream_error: Option<(ErrorKind, String)> = None;
        let mut reasoning_details: Option<serde_json::Value> = None;
        let mut saw_done = false;

        while let Some(event) = rx.recv().await {
            state.apply_event(&event);
            match event {
                StreamEvent::ReasoningChunk(text) => {
                    self.emit(EngineEvent::ReasoningDelta(text)).await;
                }
                StreamEvent::ContentChunk(text) => {
                    self.emit(EngineEvent::ContentDelta(text)).await;
                }
                StreamEvent::ToolCallDelta(snapshot) => {
                    self.emit(EngineEvent::ToolCallSnapshot(snapshot)).await;
                }
                StreamEvent::Error { kind, message } => {
                    stream_error = Some((kind, message));
                }
                StreamEvent::Done {
                    reasoning_details: details,
                    ..
                } => {
                    saw_done = true;
                    reasoning_details = details;
                }
            }
        }

        if !saw_done && stream_error.is_none() {
            stream_error = Some((
                ErrorKind::Transport,
                "stream ended without a terminal event".to_string(),
            ));
        }

        let cancelled = cancel.is_cancelled()
            || state.finish_reason.as_deref() == Some("cancelled");

        // Terminal-state separation of the buffers.
        let parsed = parse_stream_text(&state.content, &state.reasoning);

        // The structured map is authoritative; XML fallback applies only
        // when the map never saw a delta.
        let tool_calls = if state.tool_calls.is_empty() {
            parsed.tool_calls.clone()
        } else {
            state.finalize_tool_calls(cancelled)
        };

        let mut content = parsed.content.trim().to_string();
        if content.is_empty() && tool_calls.is_empty() {
            if !state.content.is_empty() {
                warn!("raw buffer had bytes but nothing parseable; keeping a prefix");
                content = format!(
                    "[note: response could not be parsed; first 500 bytes follow]\n{}",
                    byte_prefix(&state.content, 500)
                );
            } else if stream_error.is_none()
                || matches!(stream_error, Some((ErrorKind::EmptyResponse, _)))
            {
                content = format!(
                    "[no response from model (finish reason: {})]",
                    state.finish_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        if let Some((kind, message)) = &stream_error {
            if *kind != ErrorKind::EmptyResponse {
                if content.is_empty() {
                    content = format!("[Error: {message}]");
                } else {
                    content.push_str(&format!("\n\n[Error: {message}]"));
                }
            }
        }

        let mut assistant = Message::assistant(content);
        if !parsed.reasoning.is_empty() {
            assistant.reasoning = Some(parsed.reasoning.clone());
        }
        assistant.reasoning_details = reasoning_details;
        assistant.tool_calls = tool_calls.clone();

        let message_id = self.persist(assistant)?;
        self.emit(EngineEvent::AssistantFinalized { message_id }).await;

        Ok(Round {
            tool_calls,
            stream_error,
            cancelled,
            usage: state.usage,
        })
    }

    // ── Tool execution ────────────────────────────────────────────────────────

    /// Run the round's tool calls sequentially, in stream order.
    async fn run_tools(
        &mut self,
        calls: &[ToolCall],
        cancel: &CancelToken,
    ) -> anyhow::Result<()> {
        for (i, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                // The rest never run; close them out so every call id still
                // gets its result.
                self.synthesize_failed_results(&calls[i..], "Error: cancelled before execution")
                    .await?;
                return Ok(());
            }

            self.emit(EngineEvent::ToolStart {
                call_id: call.id.clone(),
                name: call.name.clone(),
            })
            .await;

            debug!(tool = %call.name, call_id = %call.id, "executing tool");
            let exec = execute_tool(
                &self.tools,
                self.bridge.as_deref(),
                call,
                self.mode,
                cancel,
            )
            .await;

            self.emit(EngineEvent::ToolEnd {
                call_id: call.id.clone(),
                status: if exec.is_error {
                    ToolStatus::Error
                } else {
                    ToolStatus::Done
                },
                preview: exec.preview.clone(),
            })
            .await;

            let mut result = Message::tool_result(&call.id, &call.name, exec.result);
            result.preview = exec.preview;
            self.persist(result)?;
        }
        Ok(())
    }

    /// Close out calls that will never execute, preserving the
    /// call/result bijection.
    async fn synthesize_failed_results(
        &mut self,
        calls: &[ToolCall],
        text: &str,
    ) -> anyhow::Result<()> {
        for call in calls {
            self.emit(EngineEvent::ToolEnd {
                call_id: call.id.clone(),
                status: ToolStatus::Error,
                preview: None,
            })
            .await;
            self.persist(Message::tool_result(&call.id, &call.name, text))?;
        }
        Ok(())
    }

    // ── Plumbing ──────────────────────────────────────────────────────────────

    /// System message recomputed per request, then the persisted transcript.
    fn request_messages(&self) -> Vec<Message> {
        let mut messages =
            Vec::with_capacity(self.history.len() + 1);
        messages.push(Message::system(system_prompt(self.mode, &self.cwd)));
        messages.extend(self.history.iter().cloned());
        messages
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .schemas(self.mode)
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    fn persist(&mut self, message: Message) -> anyhow::Result<i64> {
        let id = self.store.append(&self.session.id, &message)?;
        self.history.push(message);
        Ok(id)
    }

    fn roll_session(&mut self) -> anyhow::Result<()> {
        let fresh = self.store.create_session(self.provider.model_name())?;
        debug!(old = %self.session.id, new = %fresh.id, "rolled over to fresh session");
        self.session = fresh;
        self.history.clear();
        self.budget = TokenBudget::new();
        Ok(())
    }

    async fn emit(&self, event: EngineEvent) {
        // A dropped receiver means the consumer is gone; the engine keeps
        // its transcript duties regardless.
        let _ = self.events.send(event).await;
    }
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary.
fn byte_prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
