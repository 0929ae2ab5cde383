// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Home-directory folder holding `config.json` and `sessions.db`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mmx")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

pub fn sessions_db_path() -> PathBuf {
    data_dir().join("sessions.db")
}

/// Load the configuration, falling back to defaults when no file exists.
///
/// A file that exists but fails to parse is a hard error: silently ignoring
/// a broken config would run with the wrong API key or model.
pub fn load() -> anyhow::Result<Config> {
    let path = config_path();
    if !path.is_file() {
        debug!(path = %path.display(), "no config file; using defaults");
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
