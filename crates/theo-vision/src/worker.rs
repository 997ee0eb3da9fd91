// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::json;
use tracing::{debug, error, info};

use theo_config::{AttentionConfig, CameraConfig};
use theo_events::{Event, EventBus, Priority};

use crate::{
    mean_abs_diff, AttentionController, AttentionState, CameraChangePolicy, DetectionEvent,
};

/// Captures frames. The camera bring-up behind this is an external
/// collaborator; `capture_luma` is the low-resolution change-detection
/// plane, `capture_jpeg` the full frame sent upstream.
pub trait FrameSource: Send + Sync {
    fn capture_luma(&self) -> anyhow::Result<Vec<u8>>;
    fn capture_jpeg(&self) -> anyhow::Result<Vec<u8>>;
}

/// Supplies the most recent accelerator detections, if any.
pub trait DetectionSource: Send + Sync {
    fn latest(&self) -> Option<DetectionEvent>;
}

/// Periodic vision loop: luma MAD → change policy + attention machine →
/// camera events on the bus. Runs as a dedicated worker thread; capture is
/// skipped while the head is moving so motion blur never counts as change.
pub struct VisionWorker {
    frames: Arc<dyn FrameSource>,
    detections: Option<Arc<dyn DetectionSource>>,
    bus: Arc<EventBus>,
    camera_config: CameraConfig,
    attention_config: AttentionConfig,
    motion_gate: Arc<dyn Fn() -> bool + Send + Sync>,
    stop_tx: Option<Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl VisionWorker {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        detections: Option<Arc<dyn DetectionSource>>,
        bus: Arc<EventBus>,
        camera_config: CameraConfig,
        attention_config: AttentionConfig,
        motion_gate: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Self {
        Self {
            frames,
            detections,
            bus,
            camera_config,
            attention_config,
            motion_gate,
            stop_tx: None,
            thread: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn start(&mut self) {
        if self.is_alive() {
            return;
        }
        let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = bounded(1);
        self.stop_tx = Some(stop_tx);

        let frames = Arc::clone(&self.frames);
        let detections = self.detections.clone();
        let bus = Arc::clone(&self.bus);
        let motion_gate = Arc::clone(&self.motion_gate);
        let camera_config = self.camera_config.clone();
        let attention_config = self.attention_config.clone();

        self.thread = Some(
            std::thread::Builder::new()
                .name("vision-loop".into())
                .spawn(move || {
                    vision_loop(
                        frames,
                        detections,
                        bus,
                        camera_config,
                        attention_config,
                        motion_gate,
                        stop_rx,
                    )
                })
                .expect("spawn vision loop thread"),
        );
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for VisionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn vision_loop(
    frames: Arc<dyn FrameSource>,
    detections: Option<Arc<dyn DetectionSource>>,
    bus: Arc<EventBus>,
    camera_config: CameraConfig,
    attention_config: AttentionConfig,
    motion_gate: Arc<dyn Fn() -> bool + Send + Sync>,
    stop_rx: Receiver<()>,
) {
    let epoch = Instant::now();
    let mut policy = CameraChangePolicy::new(camera_config.clone());
    let mut attention = AttentionController::new(attention_config);
    let mut last_luma: Option<Vec<u8>> = None;
    let mut frame_count: u64 = 0;

    loop {
        let period = attention.capture_period_ms(attention.state(), camera_config.base_period_ms);
        if stop_rx.recv_timeout(Duration::from_millis(period.max(1))).is_ok() {
            info!(frames = frame_count, "vision loop stopped");
            return;
        }
        if (motion_gate)() {
            debug!("vision capture skipped (motion active)");
            continue;
        }

        let now_ms = epoch.elapsed().as_millis() as u64;
        let now_s = epoch.elapsed().as_secs_f64();
        frame_count += 1;

        let luma = match frames.capture_luma() {
            Ok(luma) => luma,
            Err(err) => {
                error!(%err, "luma capture failed (retrying)");
                continue;
            }
        };
        // First frame always counts as changed.
        let mad = match &last_luma {
            None => 999.0,
            Some(previous) => mean_abs_diff(previous, &luma),
        };
        last_luma = Some(luma);

        let result = policy.update(mad, now_s);
        let mad_changed = mad >= camera_config.mad_threshold;
        let detection_event = detections.as_ref().and_then(|d| d.latest());
        let state = attention.update(now_ms, mad_changed, detection_event.as_ref());

        let should_send = attention.should_send_image(state, mad_changed, detection_event.as_ref())
            && (result.promoted
                || matches!(state, AttentionState::Curious | AttentionState::Engaged));
        if !should_send {
            continue;
        }

        // Engaged entry may arm a burst of extra back-to-back frames.
        let extra = attention.take_burst_frames();
        for burst_index in 0..=extra {
            match frames.capture_jpeg() {
                Ok(jpeg) => publish_camera_event(&bus, mad, state, burst_index, &jpeg),
                Err(err) => {
                    error!(%err, "frame capture failed (retrying)");
                    break;
                }
            }
        }
    }
}

fn publish_camera_event(bus: &EventBus, mad: f64, state: AttentionState, burst_index: u32, jpeg: &[u8]) {
    let image_b64 = base64::engine::general_purpose::STANDARD.encode(jpeg);
    info!(mad, state = state.as_str(), burst_index, "camera change detected");
    bus.publish(
        Event::new("camera", "image")
            .with_priority(Priority::Normal)
            .with_dedupe_key("camera_image")
            .with_ttl(Duration::from_secs(30))
            .with_cooldown(Duration::from_secs(5))
            .with_metadata(
                [
                    ("mad".to_string(), json!(mad)),
                    ("attention_state".to_string(), json!(state.as_str())),
                    ("burst_index".to_string(), json!(burst_index)),
                    ("image_b64".to_string(), json!(image_b64)),
                ]
                .into_iter()
                .collect(),
            ),
        true,
    );
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_event_carries_payload_and_score() {
        let bus = EventBus::new(10);
        publish_camera_event(&bus, 42.5, AttentionState::Engaged, 0, b"jpegbytes");
        let event = bus.get_next(Duration::from_millis(1)).unwrap();
        assert_eq!(event.source, "camera");
        assert_eq!(event.metadata["mad"], json!(42.5));
        assert_eq!(event.metadata["attention_state"], json!("engaged"));
        let b64 = event.metadata["image_b64"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(decoded, b"jpegbytes");
    }

    #[test]
    fn camera_events_coalesce_on_the_bus() {
        let bus = EventBus::new(10);
        publish_camera_event(&bus, 10.0, AttentionState::Curious, 0, b"first");
        publish_camera_event(&bus, 20.0, AttentionState::Curious, 0, b"second");
        assert_eq!(bus.len(), 1);
        let event = bus.get_next(Duration::from_millis(1)).unwrap();
        assert_eq!(event.metadata["mad"], json!(20.0));
    }
}
