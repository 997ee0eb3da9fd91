// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::{Tool, ToolCall, ToolOutput, ToolSpec};

/// Central registry holding the tool catalog, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool catalog advertised in `session.update`, sorted by name.
    pub fn catalog(&self) -> Vec<Value> {
        let mut entries: Vec<(String, Value)> = self
            .tools
            .values()
            .map(|tool| {
                (
                    tool.name().to_string(),
                    json!({
                        "type": "function",
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema(),
                    }),
                )
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Per-tool default specs, for seeding governance.
    pub fn default_specs(&self) -> HashMap<String, ToolSpec> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.default_spec()))
            .collect()
    }

    /// Dispatch a call. Unknown tools produce a structured error output.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => {
                let output = tool.execute(call).await;
                info!(tool = %call.name, is_error = output.is_error, "tool executed");
                output
            }
            None => ToolOutput::err(
                &call.id,
                format!("Function '{}' not found in the tool registry.", call.name),
            ),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
