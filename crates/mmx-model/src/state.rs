// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::types::{ErrorKind, StreamEvent, ToolCall, ToolCallSnapshot, Usage};

/// One tool call under construction, keyed by stream index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDraft {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Transient per-turn accumulation of everything the stream delivered.
///
/// Lives on both sides of the stream handle: the client feeds it from raw
/// SSE chunks (`apply_chunk`), the engine feeds an independent copy from the
/// emitted events (`apply_event`).  Both converge on the same buffers.
#[derive(Debug, Default)]
pub struct StreamState {
    /// `delta.content` bytes concatenated in arrival order.
    pub content: String,
    /// Structured reasoning (`reasoning_content` + `reasoning_details` text).
    pub reasoning: String,
    /// Opaque `reasoning_details` elements, echoed to the server next turn.
    pub reasoning_details: Vec<Value>,
    pub tool_calls: BTreeMap<u32, ToolCallDraft>,
    pub usage: Usage,
    /// Last non-empty `finish_reason` seen.
    pub finish_reason: Option<String>,
    pub chunks: u64,
    pub error: Option<(ErrorKind, String)>,
}

impl StreamState {
    /// Decode one parsed SSE chunk, mutating the buffers and returning the
    /// events to forward.  A single chunk can yield several events (e.g. a
    /// reasoning delta and a content delta in the same object).
    pub fn apply_chunk(&mut self, v: &Value) -> Vec<StreamEvent> {
        self.chunks += 1;
        let mut events = Vec::new();

        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            self.error = Some((ErrorKind::Api, message.clone()));
            events.push(StreamEvent::Error {
                kind: ErrorKind::Api,
                message,
            });
            return events;
        }

        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            if let Ok(u) = serde_json::from_value::<Usage>(usage.clone()) {
                self.usage = u;
            }
        }

        let choice = &v["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            if !reason.is_empty() {
                self.finish_reason = Some(reason.to_string());
            }
        }

        let delta = &choice["delta"];

        if let Some(text) = delta.get("reasoning_content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                self.reasoning.push_str(text);
                events.push(StreamEvent::ReasoningChunk(text.to_string()));
            }
        }

        if let Some(details) = delta.get("reasoning_details").and_then(|d| d.as_array()) {
            for item in details {
                if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                    if !text.is_empty() {
                        self.reasoning.push_str(text);
                        events.push(StreamEvent::ReasoningChunk(text.to_string()));
                    }
                }
                self.reasoning_details.push(item.clone());
            }
        }

        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                self.content.push_str(text);
                events.push(StreamEvent::ContentChunk(text.to_string()));
            }
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as u32;
                let draft = self.tool_calls.entry(index).or_default();
                if let Some(id) = tc["id"].as_str().filter(|s| !s.is_empty()) {
                    draft.id = id.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str().filter(|s| !s.is_empty()) {
                    draft.name = name.to_string();
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    draft.arguments.push_str(args);
                }
                events.push(StreamEvent::ToolCallDelta(ToolCallSnapshot {
                    index,
                    id: draft.id.clone(),
                    name: draft.name.clone(),
                    arguments: draft.arguments.clone(),
                }));
            }
        }

        events
    }

    /// Mirror one emitted event into this state.  Used by the engine to
    /// reconstruct the turn buffers without re-parsing SSE.
    pub fn apply_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ReasoningChunk(t) => self.reasoning.push_str(t),
            StreamEvent::ContentChunk(t) => self.content.push_str(t),
            StreamEvent::ToolCallDelta(snap) => {
                let draft = self.tool_calls.entry(snap.index).or_default();
                draft.id = snap.id.clone();
                draft.name = snap.name.clone();
                draft.arguments = snap.arguments.clone();
            }
            StreamEvent::Done {
                usage,
                finish_reason,
                ..
            } => {
                self.usage = *usage;
                if self.finish_reason.is_none() {
                    self.finish_reason = finish_reason.clone();
                }
            }
            StreamEvent::Error { kind, message } => {
                self.error = Some((*kind, message.clone()));
            }
        }
    }

    /// True when the stream produced nothing usable (the empty-response
    /// policy condition).
    pub fn is_empty_response(&self) -> bool {
        self.chunks == 0 && self.content.is_empty() && self.tool_calls.is_empty()
    }

    /// Flush the accumulated drafts into finalized tool calls, ordered by
    /// stream index.
    ///
    /// Nameless drafts cannot be dispatched and are dropped.  A draft with an
    /// empty id gets a synthetic `tc_synthetic_<millis>_<i>` fallback; the
    /// timestamp keeps ids from colliding across rounds of the same session,
    /// where the per-round index alone would repeat.  When
    /// `require_closed_json` is set (cancellation) drafts whose argument
    /// buffer is not complete JSON are discarded rather than surfaced as
    /// valid calls.
    pub fn finalize_tool_calls(&self, require_closed_json: bool) -> Vec<ToolCall> {
        let ts = chrono::Utc::now().timestamp_millis();
        let mut out = Vec::new();
        for (i, (_, draft)) in self.tool_calls.iter().enumerate() {
            if draft.name.is_empty() {
                warn!(tool_call_id = %draft.id, "dropping tool call with empty name");
                continue;
            }
            let arguments = if draft.arguments.is_empty() {
                "{}".to_string()
            } else {
                draft.arguments.clone()
            };
            if require_closed_json
                && serde_json::from_str::<Value>(&arguments).is_err()
            {
                warn!(tool_name = %draft.name, "dropping tool call with unterminated arguments");
                continue;
            }
            let id = if draft.id.is_empty() {
                format!("tc_synthetic_{ts}_{i}")
            } else {
                draft.id.clone()
            };
            out.push(ToolCall {
                id,
                name: draft.name.clone(),
                arguments,
            });
        }
        out
    }

    /// The accumulated opaque reasoning blobs, or `None` when the server sent
    /// none.
    pub fn reasoning_details_blob(&self) -> Option<Value> {
        if self.reasoning_details.is_empty() {
            None
        } else {
            Some(Value::Array(self.reasoning_details.clone()))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn content_delta_appends_and_emits() {
        let mut s = StreamState::default();
        let ev = s.apply_chunk(&json!({"choices":[{"delta":{"content":"Hi"}}]}));
        assert_eq!(s.content, "Hi");
        assert!(matches!(&ev[0], StreamEvent::ContentChunk(t) if t == "Hi"));
    }

    #[test]
    fn reasoning_content_goes_to_reasoning_buffer() {
        let mut s = StreamState::default();
        s.apply_chunk(&json!({"choices":[{"delta":{"reasoning_content":"think"}}]}));
        assert_eq!(s.reasoning, "think");
        assert!(s.content.is_empty());
    }

    #[test]
    fn reasoning_details_text_appends_and_blob_accumulates() {
        let mut s = StreamState::default();
        let ev = s.apply_chunk(&json!({
            "choices":[{"delta":{"reasoning_details":[{"text":"a","sig":"x"},{"text":"b"}]}}]
        }));
        assert_eq!(s.reasoning, "ab");
        assert_eq!(ev.len(), 2);
        assert_eq!(s.reasoning_details.len(), 2);
        assert_eq!(s.reasoning_details[0]["sig"], "x");
    }

    #[test]
    fn tool_call_deltas_concatenate_arguments_in_order() {
        let mut s = StreamState::default();
        s.apply_chunk(&json!({"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"c1","function":{"name":"glob","arguments":"{\"pat"}}]}}]}));
        let ev = s.apply_chunk(&json!({"choices":[{"delta":{"tool_calls":[
            {"index":0,"function":{"arguments":"tern\":\"*.txt\"}"}}]}}]}));
        let draft = &s.tool_calls[&0];
        assert_eq!(draft.id, "c1");
        assert_eq!(draft.name, "glob");
        assert_eq!(draft.arguments, "{\"pattern\":\"*.txt\"}");
        // Snapshot is cumulative, not the delta alone.
        assert!(matches!(&ev[0], StreamEvent::ToolCallDelta(snap)
            if snap.arguments == "{\"pattern\":\"*.txt\"}"));
    }

    #[test]
    fn usage_replaces_previous_snapshot() {
        let mut s = StreamState::default();
        s.apply_chunk(&json!({"usage":{"total_tokens":5}}));
        s.apply_chunk(&json!({"usage":{"total_tokens":10,"prompt_tokens":7}}));
        assert_eq!(s.usage.total_tokens, 10);
        assert_eq!(s.usage.prompt_tokens, 7);
    }

    #[test]
    fn finish_reason_retains_last_non_empty() {
        let mut s = StreamState::default();
        s.apply_chunk(&json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]}));
        s.apply_chunk(&json!({"choices":[{"delta":{},"finish_reason":""}]}));
        assert_eq!(s.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn error_chunk_sets_error_and_emits() {
        let mut s = StreamState::default();
        let ev = s.apply_chunk(&json!({"error":{"message":"rate limited"}}));
        assert!(matches!(&ev[0], StreamEvent::Error { kind: ErrorKind::Api, message }
            if message == "rate limited"));
        assert!(s.error.is_some());
    }

    #[test]
    fn empty_response_detection() {
        let s = StreamState::default();
        assert!(s.is_empty_response());
        let mut s2 = StreamState::default();
        s2.apply_chunk(&json!({"choices":[{"delta":{"content":"x"}}]}));
        assert!(!s2.is_empty_response());
    }

    #[test]
    fn finalize_drops_nameless_and_synthesizes_missing_ids() {
        let mut s = StreamState::default();
        s.tool_calls.insert(
            0,
            ToolCallDraft {
                id: String::new(),
                name: "glob".into(),
                arguments: "{}".into(),
            },
        );
        s.tool_calls.insert(
            1,
            ToolCallDraft {
                id: "x".into(),
                name: String::new(),
                arguments: "{}".into(),
            },
        );
        let calls = s.finalize_tool_calls(false);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("tc_synthetic_"), "{}", calls[0].id);
        assert!(calls[0].id.ends_with("_0"), "{}", calls[0].id);
    }

    #[test]
    fn synthetic_ids_differ_across_rounds() {
        // Two fresh per-round states, same draft shape: the ids must not
        // collide within a session even though both are at index 0.
        let make = || {
            let mut s = StreamState::default();
            s.tool_calls.insert(
                0,
                ToolCallDraft {
                    id: String::new(),
                    name: "glob".into(),
                    arguments: "{}".into(),
                },
            );
            s.finalize_tool_calls(false)[0].id.clone()
        };
        let first = make();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = make();
        assert_ne!(first, second);
    }

    #[test]
    fn finalize_with_closed_json_required_drops_partial() {
        let mut s = StreamState::default();
        s.tool_calls.insert(
            0,
            ToolCallDraft {
                id: "c1".into(),
                name: "glob".into(),
                arguments: "{\"pattern\":".into(),
            },
        );
        assert!(s.finalize_tool_calls(true).is_empty());
        assert_eq!(s.finalize_tool_calls(false).len(), 1);
    }

    #[test]
    fn finalize_empty_arguments_become_empty_object() {
        let mut s = StreamState::default();
        s.tool_calls.insert(
            0,
            ToolCallDraft {
                id: "c1".into(),
                name: "glob".into(),
                arguments: String::new(),
            },
        );
        assert_eq!(s.finalize_tool_calls(true)[0].arguments, "{}");
    }

    #[test]
    fn apply_event_mirrors_client_side_state() {
        let mut client = StreamState::default();
        let mut engine = StreamState::default();
        for chunk in [
            json!({"choices":[{"delta":{"content":"Hello "}}]}),
            json!({"choices":[{"delta":{"content":"world"}}]}),
            json!({"choices":[{"delta":{"tool_calls":[
                {"index":0,"id":"c1","function":{"name":"grep","arguments":"{}"}}]}}]}),
        ] {
            for ev in client.apply_chunk(&chunk) {
                engine.apply_event(&ev);
            }
        }
        assert_eq!(engine.content, client.content);
        assert_eq!(engine.tool_calls, client.tool_calls);
    }
}
