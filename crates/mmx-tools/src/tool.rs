// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// Access classification used for mode gating: PLAN mode exposes and runs
/// only `ReadOnly` tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ReadOnly,
    Mutating,
}

/// The payload a tool hands back on success.
///
/// `result` is the text the model sees; `meta` is optional preview metadata
/// for rendering collaborators (diff previews, write previews) and never
/// reaches the model.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: String,
    pub meta: Option<Value>,
}

impl ToolOutput {
    pub fn text(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            meta: None,
        }
    }

    pub fn with_meta(result: impl Into<String>, meta: Value) -> Self {
        Self {
            result: result.into(),
            meta: Some(meta),
        }
    }
}

/// Trait every built-in tool implements.
///
/// Failures are returned as `Err`; the executor converts them into textual
/// `Error: …` results.  Tools validate their own arguments: by the time
/// `execute` runs, `args` is whatever JSON object the model produced
/// (possibly `{}` after an argument-decode failure upstream).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object
    fn parameters_schema(&self) -> Value;
    fn kind(&self) -> ToolKind;
    async fn execute(&self, args: &Value) -> anyhow::Result<ToolOutput>;
}

/// Fetch a required string argument or fail with a message naming it.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing required parameter '{key}'"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
