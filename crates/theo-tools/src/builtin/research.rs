// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use theo_events::RollingWindow;
use theo_research::{ResearchProvider, ResearchRequest, ResearchTranscript};

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

#[derive(Debug, Deserialize)]
struct ResearchArgs {
    query: String,
    #[serde(default)]
    context: HashMap<String, Value>,
}

/// `perform_research` — dispatch a query to the research provider, within
/// the daily budget. Exhaustion returns a packet asking for explicit
/// over-budget approval rather than an error.
pub struct PerformResearchTool {
    provider: Arc<dyn ResearchProvider>,
    budget: Arc<RollingWindow>,
    transcript: Option<Arc<ResearchTranscript>>,
}

impl PerformResearchTool {
    pub fn new(
        provider: Arc<dyn ResearchProvider>,
        budget: Arc<RollingWindow>,
        transcript: Option<Arc<ResearchTranscript>>,
    ) -> Self {
        Self {
            provider,
            budget,
            transcript,
        }
    }
}

#[async_trait]
impl Tool for PerformResearchTool {
    fn name(&self) -> &str {
        "perform_research"
    }

    fn description(&self) -> &str {
        "Run a bounded web research query for datasheets, specs, or factual lookups and return a \
         structured summary with sources."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "context": { "type": "object" },
            },
            "required": ["query"],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 1,
            reversible: true,
            cost: CostHint::Expensive,
            safety_tags: vec!["network".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: ResearchArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };

        let now = Instant::now();
        if !self.budget.allow(now) {
            return ToolOutput::ok(
                &call.id,
                json!({
                    "status": "budget_exhausted",
                    "answer_summary": "The daily research budget is used up. Ask the user for \
                                       explicit approval to go over budget before retrying.",
                    "remaining_today": 0,
                }),
            );
        }

        let mut request = ResearchRequest::new(args.query);
        request.context = args.context;
        let packet = self.provider.request_research(&request).await;
        self.budget.record(now);

        if let Some(transcript) = &self.transcript {
            if let Err(err) = transcript.record(&request, &packet) {
                warn!(%err, "failed to write research transcript");
            }
        }

        let mut payload = packet.to_realtime_payload();
        payload["status"] = json!(packet.status);
        ToolOutput::ok(&call.id, payload)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
