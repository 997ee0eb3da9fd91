// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use theo_config::ToolSpecConfig;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque call id returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool: a JSON document sent back verbatim as
/// the function_call_output.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub result: Value,
    /// True when `result` is the `{"error": ...}` shape
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, result: Value) -> Self {
        Self {
            call_id: call_id.into(),
            result,
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            result: json!({ "error": message.into() }),
            is_error: true,
        }
    }

    /// The error text, when this is an error output.
    pub fn error_message(&self) -> Option<&str> {
        self.result.get("error").and_then(Value::as_str)
    }
}

/// Cost hint driving the expensive-call budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostHint {
    Cheap,
    Med,
    Expensive,
}

impl CostHint {
    pub fn parse(text: &str) -> Self {
        match text {
            "cheap" => CostHint::Cheap,
            "expensive" => CostHint::Expensive,
            _ => CostHint::Med,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CostHint::Cheap => "cheap",
            CostHint::Med => "med",
            CostHint::Expensive => "expensive",
        }
    }
}

/// Capability class and safety posture of one tool.
///
/// Tier 0 is information-only; tier ≥ 2 is side-effecting and requires
/// confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub tier: u8,
    pub reversible: bool,
    pub cost: CostHint,
    pub safety_tags: Vec<String>,
}

impl ToolSpec {
    pub fn info() -> Self {
        Self {
            tier: 0,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["read_only".into()],
        }
    }

    pub fn from_config(config: &ToolSpecConfig) -> Self {
        Self {
            tier: config.tier,
            reversible: config.reversible,
            cost: CostHint::parse(&config.cost_hint),
            safety_tags: config.safety_tags.clone(),
        }
    }
}

impl Default for ToolSpec {
    fn default() -> Self {
        // Safe fallback for unclassified tools.
        Self {
            tier: 2,
            reversible: false,
            cost: CostHint::Med,
            safety_tags: vec!["unclassified".into()],
        }
    }
}

/// Trait every tool in the catalog implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-Schema for parameters, advertised to the conversational service
    fn parameters_schema(&self) -> Value;
    /// Spec used by governance when configuration has no override
    fn default_spec(&self) -> ToolSpec {
        ToolSpec::default()
    }
    /// Execute the tool. Failures should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
