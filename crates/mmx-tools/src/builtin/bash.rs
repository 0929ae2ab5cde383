// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(unix)]
use libc;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::tool::{require_str, Tool, ToolKind, ToolOutput};

/// Per-stream byte cap: stdout and stderr are each cut at 10 KB.
const STREAM_LIMIT_BYTES: usize = 10 * 1024;

pub struct BashTool {
    pub timeout_secs: u64,
}

impl Default for BashTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command and return stdout + stderr with the exit code.\n\
         Hard limits: 30 s wall clock, 10 KB per stream (marker on cut).\n\
         Commands must be non-interactive; there is no TTY.\n\
         Do NOT use the shell for file work the dedicated tools cover:\n\
         read_file (not cat), grep tool (not grep/rg), glob (not find),\n\
         edit_file (not sed). Pipe long build output through tail -200."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Bash one-liner to execute"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mutating
    }

    async fn execute(&self, args: &Value) -> anyhow::Result<ToolOutput> {
        let command = require_str(args, "command")?.to_string();

        debug!(cmd = %command, "bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        // fd 0 → /dev/null: isatty(0) is false for the child, so terminal
        // manipulation paths are skipped.  kill_on_drop guarantees SIGKILL
        // when the future is dropped (timeout or cancellation).
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // New session: the child has no controlling terminal, so even a
        // direct open("/dev/tty") fails with ENXIO.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("spawn error: {e}"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("child stderr unavailable"))?;

        // Read both pipes continuously so the child never blocks on a full
        // pipe, keeping only the capped prefix.  On timeout the buffers hold
        // whatever arrived before the kill.
        let out_task = tokio::spawn(read_capped(stdout));
        let err_task = tokio::spawn(read_capped(stderr));

        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(self.timeout_secs), child.wait())
                .await;

        let timed_out = waited.is_err();
        if timed_out {
            // The child leads its own session (setsid), so its pid is the
            // process-group id.  Killing the group takes grandchildren with
            // it; otherwise a backgrounded process would keep the pipes open
            // and the capped readers would never see EOF.
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
            let _ = child.kill().await;
        }

        let (stdout_text, stdout_cut) = out_task.await.unwrap_or_default();
        let (stderr_text, stderr_cut) = err_task.await.unwrap_or_default();

        let mut content = String::new();
        if !stdout_text.is_empty() {
            content.push_str(&stdout_text);
            if stdout_cut {
                content.push_str("\n...[stdout truncated at 10 KB]");
            }
        }
        if !stderr_text.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("[stderr]\n");
            content.push_str(&stderr_text);
            if stderr_cut {
                content.push_str("\n...[stderr truncated at 10 KB]");
            }
        }

        if timed_out {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!(
                "...[process killed: timed out after {}s]",
                self.timeout_secs
            ));
            return Ok(ToolOutput::text(content));
        }

        let code = match waited {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            Ok(Err(e)) => anyhow::bail!("wait error: {e}"),
            Err(_) => unreachable!("timeout handled above"),
        };

        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&format!("[exit {code}]"));
        Ok(ToolOutput::text(content))
    }
}

/// Drain a pipe to EOF, retaining at most [`STREAM_LIMIT_BYTES`] bytes.
/// Returns the retained text and whether anything was discarded.
async fn read_capped(mut pipe: impl tokio::io::AsyncRead + Unpin) -> (String, bool) {
    let mut kept: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if kept.len() < STREAM_LIMIT_BYTES {
                    let take = n.min(STREAM_LIMIT_BYTES - kept.len());
                    kept.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
        }
    }
    (String::from_utf8_lossy(&kept).into_owned(), truncated)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
