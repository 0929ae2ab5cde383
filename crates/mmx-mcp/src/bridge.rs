// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::process::Stdio;

use anyhow::Context;
use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use mmx_config::McpServerConfig;
use mmx_tools::ExternalToolInfo;

use crate::framing::{read_frame, write_frame};

/// Wall-clock limit for one bridge request (list or call).
const CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

struct ServerConn {
    /// Held so the child is reaped with the connection.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
}

impl ServerConn {
    /// Send one request and wait for the response with the matching id.
    /// Notifications and stray responses arriving in between are skipped.
    async fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let msg = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        write_frame(&mut self.stdin, &msg).await?;
        loop {
            let resp = read_frame(&mut self.stdout).await?;
            if resp.get("id").and_then(|v| v.as_i64()) != Some(id) {
                continue;
            }
            if let Some(err) = resp.get("error").filter(|e| !e.is_null()) {
                anyhow::bail!("server error: {err}");
            }
            return Ok(resp.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn notify(&mut self, method: &str) -> anyhow::Result<()> {
        let msg = json!({ "jsonrpc": "2.0", "method": method });
        write_frame(&mut self.stdin, &msg).await
    }
}

/// Holds one stdio channel per configured server; access to each channel is
/// serialized through its mutex.
pub struct McpBridge {
    servers: HashMap<String, Mutex<ServerConn>>,
}

impl McpBridge {
    /// Spawn and handshake every configured server.  A server that fails to
    /// start or handshake is logged and skipped; its tools simply never
    /// surface.
    pub async fn start(configs: &HashMap<String, McpServerConfig>) -> Self {
        let mut servers = HashMap::new();
        for (name, cfg) in configs {
            match spawn_and_initialize(name, cfg).await {
                Ok(conn) => {
                    debug!(server = %name, "external server ready");
                    servers.insert(name.clone(), Mutex::new(conn));
                }
                Err(e) => warn!(server = %name, "external server unavailable: {e:#}"),
            }
        }
        Self { servers }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Collect tool listings from every live server.  A server that fails to
    /// list contributes nothing.
    pub async fn list_tools(&self) -> Vec<ExternalToolInfo> {
        let mut infos = Vec::new();
        for (name, conn) in &self.servers {
            let mut conn = conn.lock().await;
            let listed = tokio::time::timeout(CALL_TIMEOUT, conn.request("tools/list", json!({})))
                .await
                .map_err(|_| anyhow::anyhow!("timed out"))
                .and_then(|r| r);
            match listed {
                Ok(result) => infos.extend(parse_tool_list(name, &result)),
                Err(e) => warn!(server = %name, "tools/list failed: {e:#}"),
            }
        }
        infos.sort_by(|a, b| a.full_name().cmp(&b.full_name()));
        infos
    }

    /// Invoke one tool.  The result is the newline-joined `text` entries of
    /// the response content array.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> anyhow::Result<String> {
        let conn = self
            .servers
            .get(server)
            .with_context(|| format!("unknown external server '{server}'"))?;
        let mut conn = conn.lock().await;
        let result = tokio::time::timeout(
            CALL_TIMEOUT,
            conn.request("tools/call", json!({ "name": tool, "arguments": arguments })),
        )
        .await
        .map_err(|_| anyhow::anyhow!("call to {server}/{tool} timed out after 15s"))??;
        Ok(concat_text_content(&result))
    }
}

async fn spawn_and_initialize(name: &str, cfg: &McpServerConfig) -> anyhow::Result<ServerConn> {
    let mut cmd = Command::new(&cfg.command);
    cmd.args(&cfg.args)
        .envs(&cfg.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning '{}' for server '{name}'", cfg.command))?;
    let stdin = child.stdin.take().context("child stdin unavailable")?;
    let stdout = BufReader::new(child.stdout.take().context("child stdout unavailable")?);

    let mut conn = ServerConn {
        _child: child,
        stdin,
        stdout,
        next_id: 0,
    };

    tokio::time::timeout(
        CALL_TIMEOUT,
        conn.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "mmx", "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
    )
    .await
    .map_err(|_| anyhow::anyhow!("initialize timed out"))??;
    conn.notify("notifications/initialized").await?;

    Ok(conn)
}

fn parse_tool_list(server: &str, result: &Value) -> Vec<ExternalToolInfo> {
    let Some(tools) = result.get("tools").and_then(|t| t.as_array()) else {
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(|t| {
            let tool = t.get("name")?.as_str()?.to_string();
            Some(ExternalToolInfo {
                server: server.to_string(),
                tool,
                description: t
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
                parameters: t
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object" })),
                read_only: t["annotations"]["readOnlyHint"].as_bool().unwrap_or(false),
            })
        })
        .collect()
}

/// Join the `text` entries of a `tools/call` content array with newlines.
fn concat_text_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
