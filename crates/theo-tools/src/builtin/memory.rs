// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use theo_memory::MemoryManager;

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

#[derive(Debug, Deserialize)]
struct RememberArgs {
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_importance")]
    importance: u8,
}

fn default_importance() -> u8 {
    3
}

/// `remember_memory` — store a durable fact.
pub struct RememberMemoryTool {
    memory: Arc<MemoryManager>,
}

impl RememberMemoryTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RememberMemoryTool {
    fn name(&self) -> &str {
        "remember_memory"
    }

    fn description(&self) -> &str {
        "Store a durable memory about the user, preferences, or facts worth reusing. Only store \
         when the user provides stable, repeatable facts."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "importance": { "type": "integer", "minimum": 1, "maximum": 5, "default": 3 },
            },
            "required": ["content"],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 1,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["personal_data".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: RememberArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        match self.memory.remember(&args.content, &args.tags, args.importance) {
            Ok(entry) => ToolOutput::ok(
                &call.id,
                json!({
                    "memory_id": entry.memory_id,
                    "content": entry.content,
                    "tags": entry.tags,
                    "importance": entry.importance,
                }),
            ),
            Err(err) => ToolOutput::err(&call.id, format!("memory store failed: {err}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecallArgs {
    query: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    5
}

/// `recall_memories` — fetch stored memories by query.
pub struct RecallMemoriesTool {
    memory: Arc<MemoryManager>,
}

impl RecallMemoriesTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RecallMemoriesTool {
    fn name(&self) -> &str {
        "recall_memories"
    }

    fn description(&self) -> &str {
        "Fetch relevant stored memories when the user asks about prior facts, preferences, or \
         context that might have been saved."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 10, "default": 5 },
            },
            "required": [],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 0,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["read_only".into(), "personal_data".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: RecallArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        match self.memory.recall(args.query.as_deref(), args.limit) {
            Ok(memories) => ToolOutput::ok(&call.id, json!({ "memories": memories })),
            Err(err) => ToolOutput::err(&call.id, format!("memory recall failed: {err}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForgetArgs {
    memory_id: i64,
}

/// `forget_memory` — delete a stored memory by id.
pub struct ForgetMemoryTool {
    memory: Arc<MemoryManager>,
}

impl ForgetMemoryTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for ForgetMemoryTool {
    fn name(&self) -> &str {
        "forget_memory"
    }

    fn description(&self) -> &str {
        "Remove a stored memory when the user asks to delete or forget it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "memory_id": { "type": "integer", "minimum": 1 },
            },
            "required": ["memory_id"],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 1,
            reversible: false,
            cost: CostHint::Cheap,
            safety_tags: vec!["personal_data".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: ForgetArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        match self.memory.forget(args.memory_id) {
            Ok(removed) => ToolOutput::ok(
                &call.id,
                json!({ "removed": removed, "memory_id": args.memory_id }),
            ),
            Err(err) => ToolOutput::err(&call.id, format!("memory delete failed: {err}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
