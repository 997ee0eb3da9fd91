// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use theo_motion::{millis, Action, MotionController};

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

fn motion_spec() -> ToolSpec {
    ToolSpec {
        tier: 1,
        reversible: true,
        cost: CostHint::Cheap,
        safety_tags: vec!["motion".into()],
    }
}

fn enqueue_head_move(
    motion: &MotionController,
    name: &str,
    pan_degrees: Option<f64>,
    tilt_degrees: Option<f64>,
) -> Value {
    let current = motion.position();
    let target_pan = pan_degrees.unwrap_or(current.pan);
    let target_tilt = tilt_degrees.unwrap_or(current.tilt);

    let mut frame = motion.generate_base_keyframe(target_pan, target_tilt);
    frame.name = name.to_string();
    motion.add_action_to_queue(Action::new(2, millis(), name, vec![frame]));

    json!({
        "queued": true,
        "action": name,
        "target": { "pan": target_pan, "tilt": target_tilt },
        "current": { "pan": current.pan, "tilt": current.tilt },
    })
}

#[derive(Debug, Deserialize)]
struct DegreesArgs {
    degrees: f64,
}

/// `set_pan` — absolute pan position.
pub struct SetPanTool {
    motion: Arc<MotionController>,
}

impl SetPanTool {
    pub fn new(motion: Arc<MotionController>) -> Self {
        Self { motion }
    }
}

#[async_trait]
impl Tool for SetPanTool {
    fn name(&self) -> &str {
        "set_pan"
    }

    fn description(&self) -> &str {
        "Set Theo's head pan servo to an absolute position between -90 and +90 degrees. Use this \
         to look left/right."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "degrees": {
                    "type": "integer",
                    "minimum": -90,
                    "maximum": 90,
                    "description": "Target pan position where 0 is neutral, -90 is full left, and +90 is full right.",
                },
            },
            "required": ["degrees"],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        motion_spec()
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: DegreesArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        let degrees = self.motion.pan_spec().clamp(args.degrees);
        ToolOutput::ok(&call.id, enqueue_head_move(&self.motion, "set_pan", Some(degrees), None))
    }
}

/// `set_tilt` — absolute tilt position.
pub struct SetTiltTool {
    motion: Arc<MotionController>,
}

impl SetTiltTool {
    pub fn new(motion: Arc<MotionController>) -> Self {
        Self { motion }
    }
}

#[async_trait]
impl Tool for SetTiltTool {
    fn name(&self) -> &str {
        "set_tilt"
    }

    fn description(&self) -> &str {
        "Set Theo's head tilt servo to an absolute position between -45 and +45 degrees. Use this \
         to look up/down."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "degrees": {
                    "type": "integer",
                    "minimum": -45,
                    "maximum": 45,
                    "description": "Target tilt position where 0 is neutral, -45 is full down, and +45 is full up.",
                },
            },
            "required": ["degrees"],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        motion_spec()
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: DegreesArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        let degrees = self.motion.tilt_spec().clamp(args.degrees);
        ToolOutput::ok(&call.id, enqueue_head_move(&self.motion, "set_tilt", None, Some(degrees)))
    }
}

#[derive(Debug, Deserialize)]
struct ServoNameArgs {
    servo_name: String,
}

/// `get_servo_position` — current angle and limits of one servo.
pub struct GetServoPositionTool {
    motion: Arc<MotionController>,
}

impl GetServoPositionTool {
    pub fn new(motion: Arc<MotionController>) -> Self {
        Self { motion }
    }
}

#[async_trait]
impl Tool for GetServoPositionTool {
    fn name(&self) -> &str {
        "get_servo_position"
    }

    fn description(&self) -> &str {
        "Read the current position of the requested servo."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "servo_name": {
                    "type": "string",
                    "enum": ["pan", "tilt"],
                    "description": "The name of the servo to read.",
                },
            },
            "required": ["servo_name"],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 0,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["read_only".into(), "motion".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: ServoNameArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        let position = self.motion.position();
        let (degrees, spec) = match args.servo_name.as_str() {
            "pan" => (position.pan, self.motion.pan_spec()),
            "tilt" => (position.tilt, self.motion.tilt_spec()),
            other => {
                return ToolOutput::err(&call.id, format!("unknown servo: {other}"));
            }
        };
        ToolOutput::ok(
            &call.id,
            json!({
                "servo": args.servo_name,
                "degrees": degrees,
                "min_degrees": spec.min_angle,
                "max_degrees": spec.max_angle,
            }),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
