// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

/// Current output volume as reported by the mixer.
#[derive(Debug, Clone, Copy)]
pub struct VolumeStatus {
    pub percent: u32,
    pub muted: bool,
}

/// Mixer seam. The ALSA adapter behind this is an external collaborator.
pub trait VolumeBackend: Send + Sync {
    fn get(&self) -> anyhow::Result<VolumeStatus>;
    fn set(&self, percent: u32) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("Volume percent must be within {min}-{max}, got {got}.")]
    OutOfRange { min: u32, max: u32, got: i64 },
    #[error("Volume change rate-limited. Retry after {retry_after_s:.2}s.")]
    RateLimited { retry_after_s: f64 },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Authoritative output volume controller with a non-emergency rate limit.
pub struct OutputVolumeController {
    backend: Arc<dyn VolumeBackend>,
    min_percent: u32,
    max_percent: u32,
    rate_limit: Duration,
    last_set: Mutex<Option<Instant>>,
}

impl OutputVolumeController {
    pub fn new(backend: Arc<dyn VolumeBackend>) -> Self {
        Self {
            backend,
            min_percent: 1,
            max_percent: 100,
            rate_limit: Duration::from_secs(1),
            last_set: Mutex::new(None),
        }
    }

    pub fn get_volume(&self) -> anyhow::Result<VolumeStatus> {
        self.backend.get()
    }

    pub fn set_volume(&self, percent: i64, emergency: bool) -> Result<VolumeStatus, VolumeError> {
        self.set_volume_at(percent, emergency, Instant::now())
    }

    pub fn set_volume_at(
        &self,
        percent: i64,
        emergency: bool,
        now: Instant,
    ) -> Result<VolumeStatus, VolumeError> {
        if percent < self.min_percent as i64 || percent > self.max_percent as i64 {
            return Err(VolumeError::OutOfRange {
                min: self.min_percent,
                max: self.max_percent,
                got: percent,
            });
        }
        if !emergency {
            if let Some(last) = *self.last_set.lock() {
                let elapsed = now.duration_since(last);
                if elapsed < self.rate_limit {
                    return Err(VolumeError::RateLimited {
                        retry_after_s: (self.rate_limit - elapsed).as_secs_f64(),
                    });
                }
            }
        }
        self.backend.set(percent as u32)?;
        *self.last_set.lock() = Some(now);
        Ok(self.backend.get()?)
    }
}

/// `get_output_volume`.
pub struct GetOutputVolumeTool {
    controller: Arc<OutputVolumeController>,
}

impl GetOutputVolumeTool {
    pub fn new(controller: Arc<OutputVolumeController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl Tool for GetOutputVolumeTool {
    fn name(&self) -> &str {
        "get_output_volume"
    }

    fn description(&self) -> &str {
        "Read the current output audio volume."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 0,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["read_only".into(), "audio".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.controller.get_volume() {
            Ok(status) => ToolOutput::ok(
                &call.id,
                json!({ "percent": status.percent, "muted": status.muted }),
            ),
            Err(err) => ToolOutput::err(&call.id, format!("volume read failed: {err}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetVolumeArgs {
    percent: i64,
    #[serde(default)]
    emergency: bool,
}

/// `set_output_volume` — bounds-checked, rate-limited unless emergency.
pub struct SetOutputVolumeTool {
    controller: Arc<OutputVolumeController>,
}

impl SetOutputVolumeTool {
    pub fn new(controller: Arc<OutputVolumeController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl Tool for SetOutputVolumeTool {
    fn name(&self) -> &str {
        "set_output_volume"
    }

    fn description(&self) -> &str {
        "Set the output audio volume. Volume percent must be between 1 and 100. Changes are \
         rate-limited to once per second unless emergency is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "percent": { "type": "integer", "minimum": 1, "maximum": 100 },
                "emergency": { "type": "boolean", "default": false },
            },
            "required": ["percent"],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 1,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["audio".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: SetVolumeArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        match self.controller.set_volume(args.percent, args.emergency) {
            Ok(status) => ToolOutput::ok(
                &call.id,
                json!({ "percent": status.percent, "muted": status.muted }),
            ),
            Err(err) => ToolOutput::err(&call.id, err.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMixer {
        percent: Mutex<u32>,
    }

    impl FakeMixer {
        fn new() -> Self {
            Self {
                percent: Mutex::new(40),
            }
        }
    }

    impl VolumeBackend for FakeMixer {
        fn get(&self) -> anyhow::Result<VolumeStatus> {
            Ok(VolumeStatus {
                percent: *self.percent.lock(),
                muted: false,
            })
        }
        fn set(&self, percent: u32) -> anyhow::Result<()> {
            *self.percent.lock() = percent;
            Ok(())
        }
    }

    fn controller() -> Arc<OutputVolumeController> {
        Arc::new(OutputVolumeController::new(Arc::new(FakeMixer::new())))
    }

    #[test]
    fn out_of_range_fails() {
        let controller = controller();
        assert!(matches!(
            controller.set_volume(0, false),
            Err(VolumeError::OutOfRange { .. })
        ));
        assert!(matches!(
            controller.set_volume(101, false),
            Err(VolumeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn second_call_within_window_is_rate_limited_with_retry_hint() {
        let controller = controller();
        let t0 = Instant::now();
        controller.set_volume_at(50, false, t0).unwrap();
        let err = controller
            .set_volume_at(60, false, t0 + Duration::from_millis(200))
            .unwrap_err();
        assert!(err.to_string().contains("Retry after"));
        match err {
            VolumeError::RateLimited { retry_after_s } => {
                assert!(retry_after_s > 0.0 && retry_after_s <= 1.0);
            }
            other => panic!("expected rate limit, got {other}"),
        }
    }

    #[test]
    fn emergency_bypasses_the_rate_limit() {
        let controller = controller();
        let t0 = Instant::now();
        controller.set_volume_at(50, false, t0).unwrap();
        let status = controller
            .set_volume_at(10, true, t0 + Duration::from_millis(200))
            .unwrap();
        assert_eq!(status.percent, 10);
    }

    #[test]
    fn window_expiry_allows_the_next_change() {
        let controller = controller();
        let t0 = Instant::now();
        controller.set_volume_at(50, false, t0).unwrap();
        assert!(controller
            .set_volume_at(60, false, t0 + Duration::from_millis(1100))
            .is_ok());
    }

    #[tokio::test]
    async fn set_tool_reports_rate_limit_as_error_output() {
        let controller = controller();
        let tool = SetOutputVolumeTool::new(Arc::clone(&controller));
        let call = ToolCall {
            id: "c1".into(),
            name: "set_output_volume".into(),
            args: json!({"percent": 30}),
        };
        assert!(!tool.execute(&call).await.is_error);
        let second = tool.execute(&call).await;
        assert!(second.is_error);
        assert!(second.error_message().unwrap().contains("rate-limited"));
    }

    #[tokio::test]
    async fn get_tool_reads_the_mixer() {
        let tool = GetOutputVolumeTool::new(controller());
        let output = tool
            .execute(&ToolCall {
                id: "c1".into(),
                name: "get_output_volume".into(),
                args: json!({}),
            })
            .await;
        assert_eq!(output.result["percent"], json!(40));
    }
}
