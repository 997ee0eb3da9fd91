// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use theo_sensors::EnvironmentSource;

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

/// `read_environment` — onboard air pressure and temperature.
pub struct ReadEnvironmentTool {
    source: Arc<dyn EnvironmentSource>,
}

impl ReadEnvironmentTool {
    pub fn new(source: Arc<dyn EnvironmentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for ReadEnvironmentTool {
    fn name(&self) -> &str {
        "read_environment"
    }

    fn description(&self) -> &str {
        "Fetch Theo's internal air pressure and temperature from the onboard barometer. This is \
         Theo's onboard reading, not external weather data. Return values in hPa and Celsius."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 0,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["read_only".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.source.read() {
            Ok(reading) => ToolOutput::ok(
                &call.id,
                json!({
                    "air_pressure": reading.pressure_hpa,
                    "air_temperature": reading.temperature_c,
                    "pressure_unit": "hPa",
                    "temperature_unit": "C",
                }),
            ),
            Err(err) => ToolOutput::err(&call.id, format!("environment read failed: {err}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
