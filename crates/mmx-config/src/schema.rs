// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_model() -> String {
    "MiniMax-M2".into()
}
fn default_base_url() -> String {
    "https://api.minimax.io/v1".into()
}
fn default_theme() -> String {
    "dark".into()
}

/// Top-level configuration, read from `~/.mmx/config.json`.
///
/// A missing file yields `Config::default()`; unknown keys are ignored so
/// older binaries can open newer config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API key for the model endpoint.  Falls back to the MMX_API_KEY
    /// environment variable when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL ending before `/chat/completions`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier forwarded to the API.
    #[serde(default = "default_model")]
    pub model: String,
    /// Display theme name.  Cosmetic; consumed by the renderer, never by the
    /// engine.
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Endpoint the `web_search` tool POSTs queries to.  The tool reports a
    /// configuration error when unset.
    #[serde(default)]
    pub search_endpoint: Option<String>,
    /// External tool servers, keyed by server name.  Tools are surfaced to
    /// the model as `mcp__<server>__<tool>`.
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            theme: default_theme(),
            search_endpoint: None,
            mcp_servers: HashMap::new(),
        }
    }
}

impl Config {
    /// Resolve the API key from config or the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("MMX_API_KEY").ok())
    }
}

/// Launch description for one external tool server subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// The access class currently granted to the engine.
///
/// `Plan` restricts the tool surface to read-only tools; `Builder` allows
/// mutation.  Mutating tools invoked in `Plan` mode get a policy refusal as
/// their result text, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Read-only analysis; no writes, no shell
    Plan,
    /// Full agent with read/write tools
    Builder,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Builder => write!(f, "builder"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_model_and_base_url() {
        let c = Config::default();
        assert_eq!(c.model, "MiniMax-M2");
        assert!(c.base_url.starts_with("https://"));
        assert!(c.mcp_servers.is_empty());
    }

    #[test]
    fn empty_json_object_deserializes_to_defaults() {
        let c: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(c.model, Config::default().model);
        assert_eq!(c.theme, "dark");
    }

    #[test]
    fn mcp_server_map_round_trips() {
        let json = r#"{
            "api_key": "sk-test",
            "mcp_servers": {
                "fs": { "command": "mcp-fs", "args": ["--root", "/tmp"] }
            }
        }"#;
        let c: Config = serde_json::from_str(json).unwrap();
        assert_eq!(c.api_key.as_deref(), Some("sk-test"));
        let fs = c.mcp_servers.get("fs").unwrap();
        assert_eq!(fs.command, "mcp-fs");
        assert_eq!(fs.args, vec!["--root", "/tmp"]);
        assert!(fs.env.is_empty());
    }

    #[test]
    fn mode_display_is_lowercase() {
        assert_eq!(AgentMode::Plan.to_string(), "plan");
        assert_eq!(AgentMode::Builder.to_string(), "builder");
    }
}
