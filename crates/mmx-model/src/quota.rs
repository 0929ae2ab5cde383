// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use serde_json::Value;

use crate::client::MiniMaxClient;

/// Remaining quota for the current billing interval, from
/// `GET /coding_plan/remains`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub total: u64,
    pub used: u64,
    /// Milliseconds until the interval resets.
    pub resets_in_ms: u64,
}

impl QuotaSnapshot {
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }
}

impl MiniMaxClient {
    /// Fetch the quota snapshot.  Polled by the CLI outside the conversation
    /// loop; failures here are informational, never fatal.
    pub async fn quota(&self) -> anyhow::Result<QuotaSnapshot> {
        let key = self.api_key().context("no API key configured")?;
        let resp = self
            .http()
            .get(self.quota_url())
            .bearer_auth(key)
            .send()
            .await
            .context("quota request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("quota endpoint returned {}", resp.status());
        }
        let body: Value = resp.json().await.context("quota response not JSON")?;
        parse_quota(&body).context("unexpected quota response shape")
    }
}

fn parse_quota(body: &Value) -> Option<QuotaSnapshot> {
    let entry = body.get("model_remains")?.as_array()?.first()?;
    Some(QuotaSnapshot {
        total: entry["current_interval_total_count"].as_u64()?,
        used: entry["current_interval_usage_count"].as_u64().unwrap_or(0),
        resets_in_ms: entry["remains_time"].as_u64().unwrap_or(0),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
