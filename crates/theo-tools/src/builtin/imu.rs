// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use theo_sensors::ImuMonitorHandle;

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

/// `read_imu_data` — latest fused orientation plus recent motion events.
pub struct ReadImuDataTool {
    imu: ImuMonitorHandle,
}

impl ReadImuDataTool {
    pub fn new(imu: ImuMonitorHandle) -> Self {
        Self { imu }
    }
}

#[async_trait]
impl Tool for ReadImuDataTool {
    fn name(&self) -> &str {
        "read_imu_data"
    }

    fn description(&self) -> &str {
        "Fetch the latest IMU orientation (roll/pitch/yaw) and raw accel/gyro/mag readings. \
         Return a human-readable summary string plus structured values."
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
        let Some(sample) = self.imu.latest_sample() else {
            return ToolOutput::ok(
                &call.id,
                json!({
                    "status": "no_data",
                    "message": "IMU has not produced a sample yet.",
                }),
            );
        };

        let events: Vec<Value> = self
            .imu
            .recent_events(5)
            .into_iter()
            .map(|event| {
                json!({
                    "event_type": event.event_type.as_str(),
                    "severity": event.severity,
                    "details": event.details,
                })
            })
            .collect();

        let summary = format!(
            "IMU readings: roll {:.2}°, pitch {:.2}°, yaw {:.2}°. Accel {:?}. Gyro {:?}. Mag {:?}.",
            sample.roll, sample.pitch, sample.yaw, sample.accel, sample.gyro, sample.mag
        );

        ToolOutput::ok(
            &call.id,
            json!({
                "status": "ok",
                "summary": summary,
                "orientation": {
                    "roll_deg": sample.roll,
                    "pitch_deg": sample.pitch,
                    "yaw_deg": sample.yaw,
                },
                "accel": sample.accel,
                "gyro": sample.gyro,
                "mag": sample.mag,
                "recent_events": events,
                "units": {
                    "orientation": "degrees",
                    "accel": "raw",
                    "gyro": "raw",
                    "mag": "raw",
                },
            }),
        )
    }
}
