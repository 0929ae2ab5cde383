// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Incremental separator for the model's text channel.
//!
//! The raw content buffer interleaves prose with two tagged block forms:
//! `<think>…</think>` (opaque reasoning) and
//! `<minimax:tool_call><invoke name="N">…</invoke></minimax:tool_call>`
//! (inlined tool invocations).  A single pass with exact tag matching splits
//! the buffer into user-visible content, reasoning, and tool calls; no XML
//! parser is involved, and partial-tag detection at the buffer end lives in
//! one function so streaming previews and final parses agree.

use serde_json::Value;

use mmx_model::ToolCall;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const TC_OPEN: &str = "<minimax:tool_call>";
const TC_CLOSE: &str = "</minimax:tool_call>";

/// Result of one parse over the (possibly partial) raw buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTurn {
    /// Prose with all completed blocks removed.
    pub content: String,
    /// Structured reasoning followed by `<think>` reasoning, newline-joined.
    pub reasoning: String,
    /// Tool calls recovered from embedded XML, ids `xml_tc_<millis>_<i>`.
    pub tool_calls: Vec<ToolCall>,
    /// Set when the buffer ends inside a block or a split tag.
    pub pending: bool,
}

/// Split `raw` into content / reasoning / tool calls.
///
/// `structured_reasoning` is the side-channel reasoning buffer; `<think>`
/// reasoning is appended to it with a single newline, both preserved
/// verbatim (no deduplication even when a server echoes both channels).
pub fn parse_stream_text(raw: &str, structured_reasoning: &str) -> ParsedTurn {
    let mut content = String::new();
    let mut think_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut pending = false;

    let ts = chrono::Utc::now().timestamp_millis();
    let mut rest = raw;

    loop {
        let think_at = rest.find(THINK_OPEN);
        let tc_at = rest.find(TC_OPEN);

        let (at, is_think) = match (think_at, tc_at) {
            (None, None) => {
                content.push_str(rest);
                break;
            }
            (Some(t), None) => (t, true),
            (None, Some(c)) => (c, false),
            (Some(t), Some(c)) if t < c => (t, true),
            (_, Some(c)) => (c, false),
        };

        content.push_str(&rest[..at]);

        if is_think {
            let after = &rest[at + THINK_OPEN.len()..];
            match after.find(THINK_CLOSE) {
                Some(close) => {
                    let inner = after[..close].trim();
                    if !inner.is_empty() {
                        think_parts.push(inner.to_string());
                    }
                    rest = &after[close + THINK_CLOSE.len()..];
                }
                None => {
                    // Unclosed think: everything after is partial reasoning.
                    let inner = after.trim();
                    if !inner.is_empty() {
                        think_parts.push(inner.to_string());
                    }
                    pending = true;
                    break;
                }
            }
        } else {
            let after = &rest[at + TC_OPEN.len()..];
            match after.find(TC_CLOSE) {
                Some(close) => {
                    parse_invokes(&after[..close], ts, &mut tool_calls);
                    rest = &after[close + TC_CLOSE.len()..];
                }
                None => {
                    // Unclosed block: content is truncated at its start.
                    pending = true;
                    break;
                }
            }
        }
    }

    // A split tag at the very end of the buffer is stripped from content.
    let dangling = dangling_tag_prefix_len(&content);
    if dangling > 0 {
        content.truncate(content.len() - dangling);
        pending = true;
    }

    let mut reasoning = structured_reasoning.to_string();
    for part in think_parts {
        if !reasoning.is_empty() {
            reasoning.push('\n');
        }
        reasoning.push_str(&part);
    }

    ParsedTurn {
        content,
        reasoning,
        tool_calls,
        pending,
    }
}

/// Extract every `<invoke name="N">…</invoke>` in `block`.
fn parse_invokes(block: &str, ts: i64, out: &mut Vec<ToolCall>) {
    let mut rest = block;
    while let Some(open) = rest.find("<invoke name=\"") {
        let after_name = &rest[open + "<invoke name=\"".len()..];
        let Some(name_end) = after_name.find('"') else {
            return;
        };
        let name = &after_name[..name_end];
        let Some(tag_end) = after_name[name_end..].find('>') else {
            return;
        };
        let body_start = name_end + tag_end + 1;
        let Some(close) = after_name[body_start..].find("</invoke>") else {
            return;
        };
        let body = &after_name[body_start..body_start + close];

        let mut args = serde_json::Map::new();
        parse_parameters(body, &mut args);

        let index = out.len();
        out.push(ToolCall {
            id: format!("xml_tc_{ts}_{index}"),
            name: name.to_string(),
            arguments: Value::Object(args).to_string(),
        });

        rest = &after_name[body_start + close + "</invoke>".len()..];
    }
}

fn parse_parameters(body: &str, args: &mut serde_json::Map<String, Value>) {
    let mut rest = body;
    while let Some(open) = rest.find("<parameter name=\"") {
        let after_name = &rest[open + "<parameter name=\"".len()..];
        let Some(name_end) = after_name.find('"') else {
            return;
        };
        let key = &after_name[..name_end];
        let Some(tag_end) = after_name[name_end..].find('>') else {
            return;
        };
        let value_start = name_end + tag_end + 1;
        let Some(close) = after_name[value_start..].find("</parameter>") else {
            return;
        };
        let value = after_name[value_start..value_start + close].trim();
        args.insert(key.to_string(), coerce_param(value));
        rest = &after_name[value_start + close + "</parameter>".len()..];
    }
}

/// Coerce a parameter value, in order: boolean literals, all-digit integers,
/// `digits.digits` floats, JSON arrays/objects, else the verbatim string.
fn coerce_param(s: &str) -> Value {
    match s {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = s.parse::<i64>() {
            return Value::from(n);
        }
    }
    if let Some((int, frac)) = s.split_once('.') {
        if !int.is_empty()
            && !frac.is_empty()
            && int.bytes().all(|b| b.is_ascii_digit())
            && frac.bytes().all(|b| b.is_ascii_digit())
        {
            if let Ok(f) = s.parse::<f64>() {
                return Value::from(f);
            }
        }
    }
    if s.starts_with('[') || s.starts_with('{') {
        if let Ok(v) = serde_json::from_str::<Value>(s) {
            return v;
        }
    }
    Value::String(s.to_string())
}

/// Length of the longest buffer-ending fragment that is a proper prefix of
/// one of the recognized tags.  Unrelated HTML-looking tags never match.
fn dangling_tag_prefix_len(tail: &str) -> usize {
    const TAGS: [&str; 4] = [THINK_OPEN, THINK_CLOSE, TC_OPEN, TC_CLOSE];
    let mut longest = 0;
    for tag in TAGS {
        for plen in 1..tag.len() {
            if plen <= tail.len() && tail.ends_with(&tag[..plen]) && plen > longest {
                longest = plen;
            }
        }
    }
    longest
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
