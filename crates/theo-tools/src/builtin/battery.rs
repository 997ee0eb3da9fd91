// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use theo_config::BatteryConfig;
use theo_sensors::VoltageSource;

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

/// `read_battery_voltage` — current pack voltage from the ADC seam.
pub struct ReadBatteryVoltageTool {
    source: Arc<dyn VoltageSource>,
    voltage_min: f64,
    voltage_max: f64,
}

impl ReadBatteryVoltageTool {
    pub fn new(source: Arc<dyn VoltageSource>, config: &BatteryConfig) -> Self {
        Self {
            source,
            voltage_min: config.voltage_min,
            voltage_max: config.voltage_max,
        }
    }
}

#[async_trait]
impl Tool for ReadBatteryVoltageTool {
    fn name(&self) -> &str {
        "read_battery_voltage"
    }

    fn description(&self) -> &str {
        "Fetch the current voltage of the onboard 2S LiPo battery. Safe operating range is 7.0V \
         to 8.4V. If the reading is within 0.5V of the minimum voltage, complain about it; being \
         near the max is fine."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 0,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["read_only".into(), "power".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.source.read_battery_voltage() {
            Ok(voltage) => ToolOutput::ok(
                &call.id,
                json!({
                    "voltage": voltage,
                    "unit": "V",
                    "min_voltage": self.voltage_min,
                    "max_voltage": self.voltage_max,
                }),
            ),
            Err(err) => ToolOutput::err(&call.id, format!("battery read failed: {err}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
