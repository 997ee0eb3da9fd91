// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info};

use theo_config::ImuConfig;
use theo_events::{Event, EventBus, Priority};

/// Reads one fused orientation sample. The I²C driver and the AHRS fusion
/// behind this are external collaborators.
pub trait ImuSource: Send + Sync {
    fn read_sample(&self) -> anyhow::Result<ImuSample>;
}

#[derive(Debug, Clone)]
pub struct ImuSample {
    pub at: Instant,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub accel: [f64; 3],
    pub gyro: [f64; 3],
    pub mag: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImuEventType {
    Tilt,
    Spin,
    Shake,
}

impl ImuEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            ImuEventType::Tilt => "tilt",
            ImuEventType::Spin => "spin",
            ImuEventType::Shake => "shake",
        }
    }
}

/// Derived IMU event for local behavior or model context.
#[derive(Debug, Clone)]
pub struct ImuMotionEvent {
    pub at: Instant,
    pub event_type: ImuEventType,
    pub severity: &'static str,
    pub details: HashMap<String, f64>,
}

/// Derives tilt / spin / shake events from consecutive samples, rate-limited
/// per event type.
pub struct ImuEventDetector {
    config: ImuConfig,
    last_event_times: HashMap<ImuEventType, Instant>,
}

impl ImuEventDetector {
    pub fn new(config: ImuConfig) -> Self {
        Self {
            config,
            last_event_times: HashMap::new(),
        }
    }

    pub fn detect(
        &mut self,
        sample: &ImuSample,
        previous: Option<&ImuSample>,
    ) -> Vec<ImuMotionEvent> {
        let mut events = Vec::new();

        if sample.roll.abs() > self.config.tilt_threshold_deg
            || sample.pitch.abs() > self.config.tilt_threshold_deg
        {
            debug!(roll = sample.roll, pitch = sample.pitch, "tilt detected");
            events.push(ImuMotionEvent {
                at: sample.at,
                event_type: ImuEventType::Tilt,
                severity: "warning",
                details: [
                    ("roll".to_string(), sample.roll),
                    ("pitch".to_string(), sample.pitch),
                ]
                .into_iter()
                .collect(),
            });
        }

        let gyro_mag = sample.gyro.iter().map(|axis| axis * axis).sum::<f64>().sqrt();
        if gyro_mag > self.config.gyro_threshold_dps {
            debug!(gyro_dps = gyro_mag, "spin detected");
            events.push(ImuMotionEvent {
                at: sample.at,
                event_type: ImuEventType::Spin,
                severity: "notice",
                details: [("gyro_dps".to_string(), gyro_mag)].into_iter().collect(),
            });
        }

        if let Some(previous) = previous {
            let roll_rate = (sample.roll - previous.roll).abs();
            let pitch_rate = (sample.pitch - previous.pitch).abs();
            if roll_rate > self.config.rate_threshold_deg
                || pitch_rate > self.config.rate_threshold_deg
            {
                debug!(roll_delta = roll_rate, pitch_delta = pitch_rate, "shake detected");
                events.push(ImuMotionEvent {
                    at: sample.at,
                    event_type: ImuEventType::Shake,
                    severity: "notice",
                    details: [
                        ("roll_delta".to_string(), roll_rate),
                        ("pitch_delta".to_string(), pitch_rate),
                    ]
                    .into_iter()
                    .collect(),
                });
            }
        }

        self.rate_limit(events)
    }

    fn rate_limit(&mut self, events: Vec<ImuMotionEvent>) -> Vec<ImuMotionEvent> {
        let min_interval = Duration::from_secs_f64(self.config.min_event_interval_s.max(0.0));
        events
            .into_iter()
            .filter(|event| {
                let allowed = match self.last_event_times.get(&event.event_type) {
                    None => true,
                    Some(&last) => event.at.duration_since(last) >= min_interval,
                };
                if allowed {
                    self.last_event_times.insert(event.event_type, event.at);
                }
                allowed
            })
            .collect()
    }
}

#[derive(Default)]
struct ImuShared {
    latest_sample: Option<ImuSample>,
    history: VecDeque<ImuMotionEvent>,
}

/// Read-side handle shared with the tools layer.
#[derive(Clone)]
pub struct ImuMonitorHandle {
    shared: Arc<Mutex<ImuShared>>,
    history_len: usize,
}

impl ImuMonitorHandle {
    pub fn latest_sample(&self) -> Option<ImuSample> {
        self.shared.lock().latest_sample.clone()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<ImuMotionEvent> {
        let shared = self.shared.lock();
        let skip = shared.history.len().saturating_sub(limit);
        shared.history.iter().skip(skip).cloned().collect()
    }

    /// Human-readable context block for session instructions.
    pub fn context_block(&self, event_limit: usize) -> String {
        let Some(sample) = self.latest_sample() else {
            return "IMU context: no samples available.".into();
        };
        let events = self.recent_events(event_limit);
        let event_lines = if events.is_empty() {
            "- None".to_string()
        } else {
            events
                .iter()
                .map(|e| format!("- {} ({}) {:?}", e.event_type.as_str(), e.severity, e.details))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "IMU context:\n- roll/pitch/yaw: {:.2}, {:.2}, {:.2}\n- accel: {:?}\n- gyro: {:?}\n- mag: {:?}\n- recent_events:\n{}",
            sample.roll, sample.pitch, sample.yaw, sample.accel, sample.gyro, sample.mag, event_lines
        )
    }

    fn push(&self, sample: ImuSample, events: &[ImuMotionEvent]) {
        let mut shared = self.shared.lock();
        shared.latest_sample = Some(sample);
        for event in events {
            if shared.history.len() >= self.history_len {
                shared.history.pop_front();
            }
            shared.history.push_back(event.clone());
        }
    }
}

/// Background sampling worker over an [`ImuSource`], publishing derived
/// events on the bus with the event metadata contract.
pub struct ImuMonitor {
    source: Arc<dyn ImuSource>,
    bus: Arc<EventBus>,
    config: ImuConfig,
    handle: ImuMonitorHandle,
    stop_tx: Option<Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ImuMonitor {
    pub fn new(source: Arc<dyn ImuSource>, bus: Arc<EventBus>, config: ImuConfig) -> Self {
        let handle = ImuMonitorHandle {
            shared: Arc::new(Mutex::new(ImuShared::default())),
            history_len: config.history_len.max(1),
        };
        Self {
            source,
            bus,
            config,
            handle,
            stop_tx: None,
            thread: None,
        }
    }

    pub fn handle(&self) -> ImuMonitorHandle {
        self.handle.clone()
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

        let source = Arc::clone(&self.source);
        let bus = Arc::clone(&self.bus);
        let handle = self.handle.clone();
        let mut detector = ImuEventDetector::new(self.config.clone());
        let period = Duration::from_secs_f64(self.config.period_s.max(0.01));

        self.thread = Some(
            std::thread::Builder::new()
                .name("imu-monitor".into())
                .spawn(move || {
                    let mut previous: Option<ImuSample> = None;
                    loop {
                        match source.read_sample() {
                            Ok(sample) => {
                                let events = detector.detect(&sample, previous.as_ref());
                                handle.push(sample.clone(), &events);
                                for event in &events {
                                    publish_imu_event(&bus, event);
                                }
                                previous = Some(sample);
                            }
                            Err(err) => error!(%err, "imu sample failed (retrying)"),
                        }
                        if stop_rx.recv_timeout(period).is_ok() {
                            break;
                        }
                    }
                })
                .expect("spawn imu monitor thread"),
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

impl Drop for ImuMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish_imu_event(bus: &EventBus, event: &ImuMotionEvent) {
    let priority = match event.severity {
        "critical" => Priority::Critical,
        "warning" => Priority::High,
        _ => Priority::Normal,
    };
    info!(
        event_type = event.event_type.as_str(),
        severity = event.severity,
        "emitting imu event"
    );
    bus.publish(
        Event::new("imu", "motion")
            .with_priority(priority)
            .with_dedupe_key(format!("imu_{}", event.event_type.as_str()))
            .with_cooldown(Duration::from_secs(5))
            .with_metadata(
                [
                    ("event_type".to_string(), json!(event.event_type.as_str())),
                    ("severity".to_string(), json!(event.severity)),
                    ("details".to_string(), json!(event.details)),
                ]
                .into_iter()
                .collect(),
            ),
        true,
    );
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
