// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::Parser;

/// MiniMax-driven terminal coding agent.
#[derive(Parser, Debug)]
#[command(name = "mmx", version, about)]
pub struct Cli {
    /// Override the session model id from config.json
    #[arg(long, value_name = "id")]
    pub model: Option<String>,

    /// Start in read-only PLAN mode (no writes, no shell)
    #[arg(long)]
    pub plan: bool,

    /// Display theme: dark, light, or mono
    #[arg(long, value_name = "name")]
    pub theme: Option<String>,

    /// List stored sessions and exit
    #[arg(long)]
    pub list_sessions: bool,
}
