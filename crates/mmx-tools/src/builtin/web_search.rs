// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolKind, ToolOutput};

pub struct WebSearchTool {
    /// Search endpoint from config; the tool reports a configuration error
    /// when unset.
    pub endpoint: Option<String>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Web search via the configured endpoint. count: 1-10 (default 5).\n\
         Use for anything that may have changed since training. Cite sources\n\
         in your answer as [Title](URL)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results (default 5, max 10)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn execute(&self, args: &Value) -> anyhow::Result<ToolOutput> {
        let query = require_str(args, "query")?.to_string();
        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(5)
            .clamp(1, 10) as usize;

        let Some(endpoint) = &self.endpoint else {
            anyhow::bail!(
                "no search endpoint configured; set search_endpoint in config.json"
            );
        };

        debug!(query = %query, count, "web_search tool");

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        let resp = client
            .post(endpoint)
            .json(&json!({ "query": query, "count": count }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("search request failed: {e}"))?;
        if !resp.status().is_success() {
            anyhow::bail!("search endpoint returned {}", resp.status());
        }
        let body: Value = resp.json().await?;

        Ok(ToolOutput::text(render_results(&body, count)))
    }
}

/// Render `{"results": [{title, url, snippet}]}` as a ranked list.
fn render_results(body: &Value, count: usize) -> String {
    let results = body
        .get("results")
        .and_then(|r| r.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[]);

    if results.is_empty() {
        return "(no results)".to_string();
    }

    results
        .iter()
        .take(count)
        .enumerate()
        .map(|(i, r)| {
            let title = r.get("title").and_then(|v| v.as_str()).unwrap_or("(no title)");
            let url = r.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let snippet = r.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
            format!("{}. {title}\n   {url}\n   {snippet}", i + 1)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
