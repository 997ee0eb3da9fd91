// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const RESEARCH_PACKET_SCHEMA: &str = "research_packet_v1";

/// Research input request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub prompt: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl ResearchRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: HashMap::new(),
        }
    }
}

/// Structured packet returned by research providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPacket {
    pub schema: String,
    pub status: String,
    pub answer_summary: String,
    #[serde(default)]
    pub extracted_facts: Vec<String>,
    #[serde(default)]
    pub sources: Vec<HashMap<String, String>>,
    #[serde(default)]
    pub safety_notes: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Default for ResearchPacket {
    fn default() -> Self {
        Self {
            schema: RESEARCH_PACKET_SCHEMA.into(),
            status: "disabled".into(),
            answer_summary: "Research subsystem disabled".into(),
            extracted_facts: Vec::new(),
            sources: Vec::new(),
            safety_notes: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

impl ResearchPacket {
    /// Safe error packet; never propagated as a crash into the conversation.
    pub fn error(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: "error".into(),
            answer_summary: "Research request failed".into(),
            safety_notes: vec![format!("research_error:{reason}")],
            metadata: [("reason".to_string(), json!(reason))].into_iter().collect(),
            ..Self::default()
        }
    }

    /// The only fields that may be passed into the realtime flow.
    pub fn to_realtime_payload(&self) -> Value {
        json!({
            "answer_summary": self.answer_summary,
            "extracted_facts": self.extracted_facts,
            "sources": self.sources,
            "safety_notes": self.safety_notes,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
