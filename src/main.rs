// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use mmx_config::AgentMode;
use mmx_core::{Engine, EngineEvent, ToolStatus};
use mmx_mcp::McpBridge;
use mmx_model::{CancelHandle, MiniMaxClient, ModelProvider};
use mmx_store::HistoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the conversation; diagnostics stay on stderr,
    // controlled by MMX_LOG (off by default).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("MMX_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let mut config = mmx_config::load().context("loading configuration")?;
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(theme) = &cli.theme {
        config.theme = theme.clone();
    }
    let mode = if cli.plan {
        AgentMode::Plan
    } else {
        AgentMode::Builder
    };

    std::fs::create_dir_all(mmx_config::data_dir()).context("creating data directory")?;
    let store = Arc::new(
        HistoryStore::open(&mmx_config::sessions_db_path()).context("opening session store")?,
    );

    if cli.list_sessions {
        for s in store.list_sessions()? {
            println!("{}  {}  {}", s.id, s.updated_at.format("%Y-%m-%d %H:%M"), s.name);
        }
        return Ok(());
    }

    let client = Arc::new(MiniMaxClient::from_config(&config));

    // External bridge: spawn configured servers and surface their tools.
    let mut registry = mmx_tools::builtin_registry(config.search_endpoint.clone());
    let bridge = if config.mcp_servers.is_empty() {
        None
    } else {
        let bridge = Arc::new(McpBridge::start(&config.mcp_servers).await);
        registry.set_external_tools(bridge.list_tools().await);
        Some(bridge)
    };
    let registry = Arc::new(registry);

    // Quota is informational; failures never block startup.
    match client.quota().await {
        Ok(q) => println!(
            "mmx · {} · {} mode · quota {}/{}",
            client.model_name(),
            mode,
            q.remaining(),
            q.total
        ),
        Err(_) => println!("mmx · {} · {} mode", client.model_name(), mode),
    }

    let (events_tx, events_rx) = mpsc::channel(64);
    let renderer = tokio::spawn(render_events(events_rx, config.theme.clone()));

    let cwd = std::env::current_dir().context("resolving working directory")?;
    let mut engine = Engine::new(
        client.clone(),
        registry,
        bridge,
        store,
        events_tx,
        mode,
        cwd,
    )?;

    // Line-oriented REPL.  Ctrl-C during a turn cancels the turn; the
    // engine finalizes whatever streamed and control returns here.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let cancel = CancelHandle::new();
        let mut turn = std::pin::pin!(engine.submit(input, cancel.token()));
        loop {
            tokio::select! {
                result = &mut turn => {
                    result?;
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                }
            }
        }
    }

    drop(engine);
    let _ = renderer.await;
    Ok(())
}

/// Render engine events as plain terminal text.  This is deliberately thin:
/// the UI is a pure projection of the event stream.
async fn render_events(mut rx: mpsc::Receiver<EngineEvent>, theme: String) {
    let (dim, reset) = match theme.as_str() {
        "mono" => ("", ""),
        _ => ("\x1b[2m", "\x1b[0m"),
    };
    let mut in_reasoning = false;
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::StreamStart => {}
            EngineEvent::ReasoningDelta(text) => {
                if !in_reasoning {
                    print!("{dim}");
                    in_reasoning = true;
                }
                print!("{text}");
            }
            EngineEvent::ContentDelta(text) => {
                if in_reasoning {
                    print!("{reset}\n");
                    in_reasoning = false;
                }
                print!("{text}");
            }
            EngineEvent::ToolCallSnapshot(_) => {}
            EngineEvent::AssistantFinalized { .. } => {
                if in_reasoning {
                    print!("{reset}");
                    in_reasoning = false;
                }
                println!();
            }
            EngineEvent::ToolStart { name, .. } => {
                println!("{dim}· {name} …{reset}");
            }
            EngineEvent::ToolEnd { status, .. } => {
                if status == ToolStatus::Error {
                    println!("{dim}  ✗ failed{reset}");
                }
            }
            EngineEvent::TokenUsage { total } => {
                println!("{dim}[{total} tokens]{reset}");
            }
            EngineEvent::SystemNotice(text) => println!("! {text}"),
            EngineEvent::Error(text) => eprintln!("error: {text}"),
            EngineEvent::TurnDone => {}
        }
        std::io::stdout().flush().ok();
    }
}
