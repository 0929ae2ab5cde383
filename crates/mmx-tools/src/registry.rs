// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use mmx_config::AgentMode;

use crate::tool::{Tool, ToolKind};

/// A tool schema as exported to the model layer.  Mirrors the model crate's
/// schema type so the tools crate stays independent of it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One tool advertised by an external bridge server.
///
/// `read_only` comes from the server's listing annotations; unknown tools are
/// assumed mutating so PLAN mode never advertises them by accident.
#[derive(Debug, Clone)]
pub struct ExternalToolInfo {
    pub server: String,
    pub tool: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub read_only: bool,
}

impl ExternalToolInfo {
    /// Name as surfaced to the model.
    pub fn full_name(&self) -> String {
        format!("mcp__{}__{}", self.server, self.tool)
    }
}

/// Result of resolving a tool name.
pub enum Lookup {
    Builtin(Arc<dyn Tool>),
    /// `mcp__<server>__<tool>`, delegated to the external bridge.
    External { server: String, tool: String },
    None,
}

/// Process-wide set of named tools.  Immutable after startup.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    external: Vec<ExternalToolInfo>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            external: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Install the tool listings discovered from bridge servers.
    pub fn set_external_tools(&mut self, infos: Vec<ExternalToolInfo>) {
        self.external = infos;
    }

    /// Split `mcp__<server>__<tool>` into its parts.
    pub fn parse_external_name(name: &str) -> Option<(&str, &str)> {
        let rest = name.strip_prefix("mcp__")?;
        let (server, tool) = rest.split_once("__")?;
        if server.is_empty() || tool.is_empty() {
            return None;
        }
        Some((server, tool))
    }

    pub fn lookup(&self, name: &str) -> Lookup {
        if let Some((server, tool)) = Self::parse_external_name(name) {
            return Lookup::External {
                server: server.to_string(),
                tool: tool.to_string(),
            };
        }
        match self.tools.get(name) {
            Some(tool) => Lookup::Builtin(Arc::clone(tool)),
            None => Lookup::None,
        }
    }

    /// Schemas filtered by mode: PLAN exposes only read-only tools (built-in
    /// and bridge alike); BUILDER exposes everything.  Sorted by name so the
    /// request body is deterministic.
    pub fn schemas(&self, mode: AgentMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| mode != AgentMode::Plan || t.kind() == ToolKind::ReadOnly)
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.extend(
            self.external
                .iter()
                .filter(|e| mode != AgentMode::Plan || e.read_only)
                .map(|e| ToolSchema {
                    name: e.full_name(),
                    description: e.description.clone(),
                    parameters: e.parameters.clone(),
                }),
        );
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.extend(self.external.iter().map(|e| e.full_name()));
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
