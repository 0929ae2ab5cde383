// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming client for the MiniMax chat-completions API.
//!
//! The wire format is the familiar `/chat/completions` SSE shape with two
//! MiniMax extensions: the `X-Reasoning-Split: true` request header (asks the
//! server to deliver reasoning on a side channel instead of inline) and
//! `reasoning_details` delta elements that must be echoed back on the next
//! turn.

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::provider::{CancelToken, CompletionRequest, ModelProvider, StreamHandle};
use crate::state::StreamState;
use crate::types::{ErrorKind, StreamEvent};
use crate::wire::build_request_body;

/// Events buffered toward a slow consumer before the reader suspends.
const CHANNEL_CAPACITY: usize = 32;

pub struct MiniMaxClient {
    model: String,
    api_key: Option<String>,
    chat_url: String,
    quota_url: String,
    client: reqwest::Client,
}

impl MiniMaxClient {
    /// `base_url` ends before `/chat/completions`.
    pub fn new(base_url: &str, api_key: Option<String>, model: impl Into<String>) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model: model.into(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            quota_url: format!("{base}/coding_plan/remains"),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &mmx_config::Config) -> Self {
        Self::new(
            &config.base_url,
            config.resolve_api_key(),
            config.model.clone(),
        )
    }

    pub(crate) fn quota_url(&self) -> &str {
        &self.quota_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

#[async_trait::async_trait]
impl ModelProvider for MiniMaxClient {
    fn name(&self) -> &str {
        "minimax"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, req: CompletionRequest, cancel: CancelToken) -> StreamHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let body = build_request_body(&self.model, &req.messages, &req.tools);
        let client = self.client.clone();
        let url = self.chat_url.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();

        tokio::spawn(async move {
            debug!(model = %model, message_count = req.messages.len(),
                   tool_count = req.tools.len(), "starting completion stream");
            run_stream(client, url, api_key, body, tx, cancel).await;
        });

        rx
    }
}

async fn run_stream(
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    body: Value,
    tx: mpsc::Sender<StreamEvent>,
    mut cancel: CancelToken,
) {
    let Some(key) = api_key else {
        let _ = tx
            .send(StreamEvent::Error {
                kind: ErrorKind::Transport,
                message: "no API key configured; set api_key in config.json or MMX_API_KEY".into(),
            })
            .await;
        return;
    };

    let resp = client
        .post(&url)
        .bearer_auth(&key)
        .header("X-Reasoning-Split", "true")
        .json(&body)
        .send()
        .await;

    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            let _ = tx
                .send(StreamEvent::Error {
                    kind: ErrorKind::Transport,
                    message: format!("request failed: {e}"),
                })
                .await;
            return;
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let _ = tx
            .send(StreamEvent::Error {
                kind: ErrorKind::Transport,
                message: format!("server error {status}: {text}"),
            })
            .await;
        return;
    }

    let mut state = StreamState::default();
    let mut byte_stream = resp.bytes_stream();
    let mut line_buf = String::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                state.finish_reason = Some("cancelled".to_string());
                finish(&state, &tx).await;
                return;
            }
            chunk = byte_stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    line_buf.push_str(&String::from_utf8_lossy(&bytes));
                    let Some(complete) = take_complete_lines(&mut line_buf) else {
                        continue;
                    };
                    for line in complete.lines() {
                        match parse_sse_data_line(line) {
                            None => {}
                            Some(SseLine::Done) => {
                                finish(&state, &tx).await;
                                return;
                            }
                            Some(SseLine::Data(v)) => {
                                for event in state.apply_chunk(&v) {
                                    let is_error = matches!(&event, StreamEvent::Error { .. });
                                    if tx.send(event).await.is_err() {
                                        return; // consumer gone
                                    }
                                    if is_error {
                                        return; // in-band error is terminal
                                    }
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(StreamEvent::Error {
                        kind: ErrorKind::Transport,
                        message: format!("stream read failed: {e}"),
                    }).await;
                    return;
                }
                None => {
                    finish(&state, &tx).await;
                    return;
                }
            }
        }
    }
}

/// Emit the terminal sequence for a stream that ended without a transport or
/// in-band error: `Error(EmptyResponse)` first when nothing arrived, then the
/// single `Done`.
async fn finish(state: &StreamState, tx: &mpsc::Sender<StreamEvent>) {
    if state.is_empty_response() {
        let _ = tx
            .send(StreamEvent::Error {
                kind: ErrorKind::EmptyResponse,
                message: "model returned no content and no tool calls".into(),
            })
            .await;
    }
    let _ = tx
        .send(StreamEvent::Done {
            usage: state.usage,
            finish_reason: state.finish_reason.clone(),
            reasoning_details: state.reasoning_details_blob(),
        })
        .await;
}

enum SseLine {
    Data(Value),
    Done,
}

/// Cut `buf` at its last newline and hand back the whole-line head.
///
/// A single SSE event is routinely split across TCP packets, so the tail
/// after the cut (a possibly empty partial line) stays in `buf` for the
/// next chunk to extend.  `None` means no line has completed yet.
fn take_complete_lines(buf: &mut String) -> Option<String> {
    let cut = buf.rfind('\n')?;
    let tail = buf.split_off(cut + 1);
    Some(std::mem::replace(buf, tail))
}

/// Parse one complete SSE line.  Non-`data:` lines, blanks, and unparseable
/// payloads are ignored; a trailing CR (CRLF framing) is tolerated.
fn parse_sse_data_line(line: &str) -> Option<SseLine> {
    let data = line
        .trim_end_matches('\r')
        .strip_prefix("data:")?
        .trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseLine::Done);
    }
    serde_json::from_str::<Value>(data).ok().map(SseLine::Data)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_line_is_taken_and_buffer_emptied() {
        let mut buf = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n".to_string();
        let complete = take_complete_lines(&mut buf).unwrap();
        assert!(buf.is_empty());
        let parsed = parse_sse_data_line(complete.lines().next().unwrap());
        assert!(matches!(parsed, Some(SseLine::Data(v))
            if v["choices"][0]["delta"]["content"] == "hi"));
    }

    #[test]
    fn incomplete_line_stays_in_buffer() {
        let partial = "data: {\"choices\":[{\"delta\":{\"content\":\"he";
        let mut buf = partial.to_string();
        assert!(take_complete_lines(&mut buf).is_none());
        assert_eq!(buf, partial);
    }

    #[test]
    fn cut_lands_after_the_last_newline() {
        let mut buf = "data: [DONE]\ndata: {\"trailing".to_string();
        let complete = take_complete_lines(&mut buf).unwrap();
        assert_eq!(complete, "data: [DONE]\n");
        assert_eq!(buf, "data: {\"trailing", "partial tail must stay behind");
    }

    #[test]
    fn event_split_across_two_chunks_reassembles() {
        let full = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"glob","arguments":""}}]}}]}"#;
        let (a, b) = full.split_at(full.len() / 2);
        let mut buf = a.to_string();
        assert!(take_complete_lines(&mut buf).is_none());
        buf.push_str(b);
        buf.push('\n');
        let complete = take_complete_lines(&mut buf).unwrap();
        assert!(buf.is_empty());
        let parsed = parse_sse_data_line(complete.lines().next().unwrap());
        assert!(matches!(parsed, Some(SseLine::Data(v))
            if v["choices"][0]["delta"]["tool_calls"][0]["id"] == "c1"));
    }

    #[test]
    fn done_sentinel_is_recognized() {
        assert!(matches!(
            parse_sse_data_line("data: [DONE]"),
            Some(SseLine::Done)
        ));
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        // `.lines()` keeps the CR; the line parser strips it.
        assert!(matches!(
            parse_sse_data_line("data: [DONE]\r"),
            Some(SseLine::Done)
        ));
    }

    #[test]
    fn comment_and_blank_lines_are_ignored() {
        let mut buf = ": keepalive\n\ndata: [DONE]\n".to_string();
        let complete = take_complete_lines(&mut buf).unwrap();
        let parsed: Vec<SseLine> = complete.lines().filter_map(parse_sse_data_line).collect();
        assert_eq!(parsed.len(), 1);
        assert!(matches!(parsed[0], SseLine::Done));
    }

    #[test]
    fn urls_are_derived_from_base() {
        let c = MiniMaxClient::new("https://api.example.com/v1/", None, "m2");
        assert_eq!(c.chat_url, "https://api.example.com/v1/chat/completions");
        assert_eq!(c.quota_url(), "https://api.example.com/v1/coding_plan/remains");
    }

    #[tokio::test]
    async fn missing_api_key_yields_transport_error_event() {
        let c = MiniMaxClient::new("http://127.0.0.1:9", None, "m2");
        let handle = crate::provider::CancelHandle::new();
        let mut rx = c
            .stream(CompletionRequest::default(), handle.token())
            .await;
        match rx.recv().await {
            Some(StreamEvent::Error { kind, message }) => {
                assert_eq!(kind, ErrorKind::Transport);
                assert!(message.contains("API key"), "{message}");
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(rx.recv().await.is_none(), "error is terminal");
    }
}
