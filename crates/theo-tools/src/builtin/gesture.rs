// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use theo_motion::{GestureLibrary, MotionController};

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

/// Gestures exposed in the tool catalog (a subset of the library).
pub const GESTURE_TOOL_NAMES: &[(&str, &str)] = &[
    ("gesture_idle", "Queue a gentle idle gesture on the pan/tilt rig."),
    ("gesture_nod", "Queue a nod gesture on the pan/tilt rig."),
    ("gesture_no", "Queue a head shake (no) gesture on the pan/tilt rig."),
    ("gesture_look_around", "Queue a casual look around gesture on the pan/tilt rig."),
    ("gesture_curious_tilt", "Queue a curious tilt gesture on the pan/tilt rig."),
    ("gesture_attention_snap", "Queue a quick attention snap gesture on the pan/tilt rig."),
];

#[derive(Debug, Deserialize)]
struct GestureArgs {
    #[serde(default)]
    delay_ms: u64,
    #[serde(default = "default_intensity")]
    intensity: f64,
}

fn default_intensity() -> f64 {
    1.0
}

/// One `gesture_*` catalog entry; builds the named library gesture and
/// queues it on the motion controller.
pub struct GestureTool {
    gesture: String,
    description: String,
    library: Arc<GestureLibrary>,
    motion: Arc<MotionController>,
}

impl GestureTool {
    pub fn new(
        gesture: &str,
        description: &str,
        library: Arc<GestureLibrary>,
        motion: Arc<MotionController>,
    ) -> Self {
        Self {
            gesture: gesture.to_string(),
            description: format!(
                "{description} Provide an optional delay in milliseconds and intensity (1.0 is normal)."
            ),
            library,
            motion,
        }
    }
}

#[async_trait]
impl Tool for GestureTool {
    fn name(&self) -> &str {
        &self.gesture
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "delay_ms": { "type": "integer", "minimum": 0, "default": 0 },
                "intensity": { "type": "number", "minimum": 0.1, "maximum": 2.0, "default": 1.0 },
            },
            "required": [],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 1,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["motion".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: GestureArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        let intensity = args.intensity.clamp(0.1, 2.0);
        match self
            .library
            .build_action(&self.motion, &self.gesture, args.delay_ms, intensity)
        {
            Ok(action) => {
                self.motion.add_action_to_queue(action);
                ToolOutput::ok(
                    &call.id,
                    json!({
                        "queued": true,
                        "gesture": self.gesture,
                        "delay_ms": args.delay_ms,
                        "intensity": intensity,
                    }),
                )
            }
            Err(err) => ToolOutput::err(&call.id, err.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
