// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::{config_path, data_dir, load, sessions_db_path};
pub use schema::{AgentMode, Config, McpServerConfig};
