// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Engine-loop tests over a scripted provider and an in-memory store.

use std::sync::Arc;

use tokio::sync::mpsc;

use mmx_config::AgentMode;
use mmx_model::{
    CancelHandle, ErrorKind, MockProvider, Role, StreamEvent, ToolCallSnapshot, Usage,
};
use mmx_store::HistoryStore;

use crate::engine::Engine;
use crate::events::{EngineEvent, ToolStatus};

fn content(text: &str) -> StreamEvent {
    StreamEvent::ContentChunk(text.into())
}

fn reasoning(text: &str) -> StreamEvent {
    StreamEvent::ReasoningChunk(text.into())
}

fn tool_delta(index: u32, id: &str, name: &str, arguments: &str) -> StreamEvent {
    StreamEvent::ToolCallDelta(ToolCallSnapshot {
        index,
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    })
}

fn done(total_tokens: u64, finish: &str) -> StreamEvent {
    StreamEvent::Done {
        usage: Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens,
        },
        finish_reason: Some(finish.into()),
        reasoning_details: None,
    }
}

struct Fixture {
    engine: Engine,
    events: mpsc::Receiver<EngineEvent>,
    store: Arc<HistoryStore>,
    provider: Arc<MockProvider>,
    _cwd: tempfile::TempDir,
}

fn fixture(mode: AgentMode, rounds: Vec<Vec<StreamEvent>>) -> Fixture {
    let cwd = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new(rounds));
    let store = Arc::new(HistoryStore::open_in_memory().unwrap());
    let tools = Arc::new(mmx_tools::builtin_registry(None));
    let (tx, rx) = mpsc::channel(256);
    let engine = Engine::new(
        provider.clone(),
        tools,
        None,
        store.clone(),
        tx,
        mode,
        cwd.path().to_path_buf(),
    )
    .unwrap();
    Fixture {
        engine,
        events: rx,
        store,
        provider,
        _cwd: cwd,
    }
}

async fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Some(ev) = rx.recv().await {
        let is_done = matches!(ev, EngineEvent::TurnDone);
        out.push(ev);
        if is_done {
            break;
        }
    }
    out
}

fn transcript(f: &Fixture) -> Vec<(Role, String)> {
    f.store
        .messages(&f.engine.session().id)
        .unwrap()
        .into_iter()
        .map(|m| (m.message.role, m.message.content))
        .collect()
}

// ── Scenario: plain answer ────────────────────────────────────────────────────

#[tokio::test]
async fn plain_answer_round_trip() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![vec![content("Hi!"), done(10, "stop")]],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("Hello", cancel.token()).await.unwrap();

    let t = transcript(&f);
    assert_eq!(t.len(), 2);
    assert_eq!(t[0], (Role::User, "Hello".into()));
    assert_eq!(t[1], (Role::Assistant, "Hi!".into()));

    let events = drain(&mut f.events).await;
    let mut saw = events.iter();
    assert!(saw.any(|e| matches!(e, EngineEvent::ContentDelta(t) if t == "Hi!")));
    assert!(saw.any(|e| matches!(e, EngineEvent::AssistantFinalized { .. })));
    assert!(saw.any(|e| matches!(e, EngineEvent::TokenUsage { total: 10 })));
    assert!(saw.any(|e| matches!(e, EngineEvent::TurnDone)));
}

#[tokio::test]
async fn first_user_message_retitles_the_session() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![vec![content("ok"), done(1, "stop")]],
    );
    let cancel = CancelHandle::new();
    f.engine
        .submit("rename the parser\nmodule", cancel.token())
        .await
        .unwrap();
    drain(&mut f.events).await;
    assert_eq!(f.engine.session().name, "rename the parser module");
}

// ── Scenario: structured tool call ────────────────────────────────────────────

#[tokio::test]
async fn structured_tool_call_executes_and_loops() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "").unwrap();
    let args = serde_json::json!({"pattern": "*.txt", "cwd": dir.path()}).to_string();

    let mut f = fixture(
        AgentMode::Builder,
        vec![
            vec![tool_delta(0, "c1", "glob", &args), done(20, "tool_calls")],
            vec![content("Found it."), done(15, "stop")],
        ],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("list files", cancel.token()).await.unwrap();

    let t = transcript(&f);
    assert_eq!(t.len(), 4, "{t:?}");
    assert_eq!(t[1].0, Role::Assistant);
    assert_eq!(t[2].0, Role::Tool);
    assert!(t[2].1.contains("a.txt"), "{}", t[2].1);
    assert_eq!(t[3], (Role::Assistant, "Found it.".into()));

    // The assistant tool-call row keeps id, name, and arguments.
    let stored = f.store.messages(&f.engine.session().id).unwrap();
    let call = &stored[1].message.tool_calls[0];
    assert_eq!(call.id, "c1");
    assert_eq!(call.name, "glob");
    assert_eq!(call.arguments, args);
    assert_eq!(stored[2].message.tool_call_id.as_deref(), Some("c1"));

    let events = drain(&mut f.events).await;
    assert!(events.iter().any(
        |e| matches!(e, EngineEvent::ToolStart { call_id, name } if call_id == "c1" && name == "glob")
    ));
    assert!(events.iter().any(
        |e| matches!(e, EngineEvent::ToolEnd { status: ToolStatus::Done, .. })
    ));
    // Two rounds → two requests; both carried a recomputed system message.
    let requests = f.provider.requests();
    assert_eq!(requests.len(), 2);
    for req in &requests {
        assert_eq!(req.messages[0].role, Role::System);
    }
    // The second request includes the tool result before the model reply.
    assert_eq!(requests[1].messages.last().unwrap().role, Role::Tool);
}

// ── Scenario: XML fallback ────────────────────────────────────────────────────

#[tokio::test]
async fn xml_tool_call_fallback_is_executed() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "payload\n").unwrap();

    let raw = format!(
        "Looking...<minimax:tool_call><invoke name=\"read_file\">\
         <parameter name=\"path\">{}</parameter></invoke></minimax:tool_call>",
        file.display()
    );
    let mut f = fixture(
        AgentMode::Builder,
        vec![
            vec![content(&raw), done(30, "stop")],
            vec![content("It says payload."), done(5, "stop")],
        ],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("read it", cancel.token()).await.unwrap();

    let stored = f.store.messages(&f.engine.session().id).unwrap();
    let assistant = &stored[1].message;
    assert_eq!(assistant.content, "Looking...");
    assert_eq!(assistant.tool_calls.len(), 1);
    assert!(assistant.tool_calls[0].id.starts_with("xml_tc_"));
    assert!(assistant.tool_calls[0].id.ends_with("_0"));
    assert_eq!(assistant.tool_calls[0].name, "read_file");

    let result = &stored[2].message;
    assert_eq!(result.tool_call_id, Some(assistant.tool_calls[0].id.clone()));
    assert!(result.content.contains("L1:payload"), "{}", result.content);
    drain(&mut f.events).await;
}

#[tokio::test]
async fn structured_calls_win_over_xml_calls() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.txt"), "").unwrap();
    let args = serde_json::json!({"pattern": "*.txt", "cwd": dir.path()}).to_string();
    let raw = "<minimax:tool_call><invoke name=\"bash\">\
               <parameter name=\"command\">echo nope</parameter></invoke></minimax:tool_call>";

    let mut f = fixture(
        AgentMode::Builder,
        vec![
            vec![
                content(raw),
                tool_delta(0, "c1", "glob", &args),
                done(5, "tool_calls"),
            ],
            vec![content("done"), done(5, "stop")],
        ],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("go", cancel.token()).await.unwrap();

    let stored = f.store.messages(&f.engine.session().id).unwrap();
    let calls = &stored[1].message.tool_calls;
    assert_eq!(calls.len(), 1, "XML call must not be added");
    assert_eq!(calls[0].name, "glob");
    drain(&mut f.events).await;
}

// ── Scenario: PLAN mode denial ────────────────────────────────────────────────

#[tokio::test]
async fn plan_mode_denies_write_and_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("never.txt");
    let args = serde_json::json!({"path": target, "content": "x"}).to_string();

    let mut f = fixture(
        AgentMode::Plan,
        vec![
            vec![tool_delta(0, "c1", "write_file", &args), done(5, "tool_calls")],
            vec![content("Understood, planning only."), done(5, "stop")],
        ],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("write it", cancel.token()).await.unwrap();

    let t = transcript(&f);
    assert!(
        t[2].1
            .starts_with("Error: Tool \"write_file\" is not available in PLAN mode"),
        "{}",
        t[2].1
    );
    assert!(!target.exists(), "filesystem must be untouched");
    assert_eq!(t[3], (Role::Assistant, "Understood, planning only.".into()));

    // PLAN request advertises no mutating tool schemas.
    let requests = f.provider.requests();
    assert!(requests[0]
        .tools
        .iter()
        .all(|t| !matches!(t.name.as_str(), "write_file" | "edit_file" | "bash")));
    drain(&mut f.events).await;
}

// ── Scenario: cancellation mid-stream ────────────────────────────────────────

#[tokio::test]
async fn cancel_mid_stream_finalizes_partial_and_skips_tools() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![vec![
            content("Par"),
            // Partial tool call: arguments never close.
            tool_delta(0, "c9", "bash", "{\"comma"),
            done(3, "cancelled"),
        ]],
    );
    let cancel = CancelHandle::new();
    cancel.cancel();
    f.engine.submit("go", cancel.token()).await.unwrap();

    let t = transcript(&f);
    assert_eq!(t.len(), 2, "exactly one assistant after the user: {t:?}");
    assert_eq!(t[1], (Role::Assistant, "Par".into()));

    let events = drain(&mut f.events).await;
    assert!(
        !events.iter().any(|e| matches!(e, EngineEvent::ToolStart { .. })),
        "no tool may run after cancellation"
    );
}

#[tokio::test]
async fn cancel_with_complete_tool_call_synthesizes_failed_result() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![vec![
            tool_delta(0, "c1", "bash", "{\"command\":\"echo hi\"}"),
            done(3, "cancelled"),
        ]],
    );
    let cancel = CancelHandle::new();
    cancel.cancel();
    f.engine.submit("go", cancel.token()).await.unwrap();

    let t = transcript(&f);
    assert_eq!(t.len(), 3, "{t:?}");
    assert_eq!(t[2].0, Role::Tool);
    assert_eq!(t[2].1, "Error: cancelled before execution");
    let events = drain(&mut f.events).await;
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::ToolStart { .. })));
}

// ── Stream errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn transport_error_wraps_transcript_and_ends_turn() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![vec![StreamEvent::Error {
            kind: ErrorKind::Transport,
            message: "connection reset".into(),
        }]],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("hello", cancel.token()).await.unwrap();

    let t = transcript(&f);
    assert_eq!(t[1].1, "[Error: connection reset]");
    let events = drain(&mut f.events).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::Error(m) if m == "connection reset")));
}

#[tokio::test]
async fn empty_response_produces_notice_with_finish_reason() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![vec![
            StreamEvent::Error {
                kind: ErrorKind::EmptyResponse,
                message: "model returned no content and no tool calls".into(),
            },
            done(0, "stop"),
        ]],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("hello", cancel.token()).await.unwrap();

    let t = transcript(&f);
    assert_eq!(t[1].1, "[no response from model (finish reason: stop)]");
    drain(&mut f.events).await;
}

#[tokio::test]
async fn unparseable_buffer_keeps_a_raw_prefix() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![vec![content("<minimax:tool_call>never closed"), done(2, "stop")]],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("go", cancel.token()).await.unwrap();

    let t = transcript(&f);
    assert!(
        t[1].1
            .starts_with("[note: response could not be parsed; first 500 bytes follow]"),
        "{}",
        t[1].1
    );
    assert!(t[1].1.contains("<minimax:tool_call>never closed"));
    drain(&mut f.events).await;
}

// ── Reasoning ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reasoning_channels_merge_into_the_assistant_record() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![vec![
            reasoning("structured thought"),
            content("<think>inline thought</think>The answer."),
            done(4, "stop"),
        ]],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("why?", cancel.token()).await.unwrap();

    let stored = f.store.messages(&f.engine.session().id).unwrap();
    let assistant = &stored[1].message;
    assert_eq!(assistant.content, "The answer.");
    assert_eq!(
        assistant.reasoning.as_deref(),
        Some("structured thought\ninline thought")
    );
    let events = drain(&mut f.events).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::ReasoningDelta(t) if t == "structured thought")));
}

// ── Token budget ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn hard_cap_rolls_to_a_fresh_session_before_next_input() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![
            vec![content("big"), done(200_000, "stop")],
            vec![content("fresh"), done(5, "stop")],
        ],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("huge turn", cancel.token()).await.unwrap();
    let first_session = f.engine.session().id.clone();
    let events = drain(&mut f.events).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::SystemNotice(m) if m.contains("token budget exceeded"))));

    f.engine.submit("next", cancel.token()).await.unwrap();
    assert_ne!(f.engine.session().id, first_session);
    assert_eq!(f.store.list_sessions().unwrap().len(), 2);
    // The fresh session starts with only the new user turn.
    let t = transcript(&f);
    assert_eq!(t.len(), 2);
    assert_eq!(t[0], (Role::User, "next".into()));
}

#[tokio::test]
async fn soft_warning_is_emitted_once() {
    let mut f = fixture(
        AgentMode::Builder,
        vec![
            vec![content("a"), done(185_000, "stop")],
            vec![content("b"), done(1, "stop")],
        ],
    );
    let cancel = CancelHandle::new();
    f.engine.submit("one", cancel.token()).await.unwrap();
    let first = drain(&mut f.events).await;
    assert!(first
        .iter()
        .any(|e| matches!(e, EngineEvent::SystemNotice(m) if m.contains("approaching"))));

    f.engine.submit("two", cancel.token()).await.unwrap();
    let second = drain(&mut f.events).await;
    assert!(!second
        .iter()
        .any(|e| matches!(e, EngineEvent::SystemNotice(_))));
}
