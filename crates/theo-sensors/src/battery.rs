// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, info, warn};

use theo_config::BatteryConfig;
use theo_events::{Event, EventBus, Priority};

/// Reads the pack voltage. The ADC driver behind this is an external
/// collaborator; tests use a scripted source.
pub trait VoltageSource: Send + Sync {
    fn read_battery_voltage(&self) -> anyhow::Result<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatterySeverity {
    Info,
    Warning,
    Critical,
}

impl BatterySeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            BatterySeverity::Info => "info",
            BatterySeverity::Warning => "warning",
            BatterySeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatteryTransition {
    Initial(BatterySeverity),
    EnterWarning,
    EnterCritical,
    RecoverInfo,
    DeltaDrop,
    Steady(BatterySeverity),
}

impl BatteryTransition {
    pub fn label(&self) -> String {
        match self {
            BatteryTransition::Initial(severity) => format!("initial_{}", severity.as_str()),
            BatteryTransition::EnterWarning => "enter_warning".into(),
            BatteryTransition::EnterCritical => "enter_critical".into(),
            BatteryTransition::RecoverInfo => "recover_info".into(),
            BatteryTransition::DeltaDrop => "delta_drop".into(),
            BatteryTransition::Steady(severity) => format!("steady_{}", severity.as_str()),
        }
    }

    pub fn is_steady(&self) -> bool {
        matches!(self, BatteryTransition::Steady(_))
    }
}

/// Derived battery status event for local behavior or model context.
#[derive(Debug, Clone)]
pub struct BatteryStatusEvent {
    pub at: Instant,
    pub voltage: f64,
    pub percent_of_range: f64,
    pub severity: BatterySeverity,
    /// "status" for samples, "clear" when leaving warning/critical
    pub event_type: &'static str,
    pub transition: BatteryTransition,
    pub delta_percent: f64,
    pub rapid_drop: bool,
}

/// Derives severity, transitions, and rapid-drop flags from voltage samples.
///
/// Severity uses a hysteresis band so a pack hovering at a threshold does
/// not flap between levels.
pub struct BatteryTracker {
    config: BatteryConfig,
    latest: Option<BatteryStatusEvent>,
}

impl BatteryTracker {
    pub fn new(mut config: BatteryConfig) -> Self {
        if config.voltage_max <= config.voltage_min {
            warn!("invalid battery voltage range; falling back to defaults");
            config.voltage_min = 7.0;
            config.voltage_max = 8.4;
        }
        Self { config, latest: None }
    }

    pub fn latest(&self) -> Option<&BatteryStatusEvent> {
        self.latest.as_ref()
    }

    /// Fold in a voltage sample. Returns the events to emit in order: a
    /// `clear` event first when the pack recovers out of warning/critical,
    /// then the status event itself.
    pub fn observe(&mut self, voltage: f64, now: Instant) -> Vec<BatteryStatusEvent> {
        let percent = ((voltage - self.config.voltage_min)
            / (self.config.voltage_max - self.config.voltage_min))
            .clamp(0.0, 1.0);
        let severity = self.derive_severity(percent);

        let previous_percent = self
            .latest
            .as_ref()
            .map(|e| e.percent_of_range)
            .unwrap_or(percent);
        let delta_percent = (percent - previous_percent) * 100.0;
        let transition = self.derive_transition(severity, delta_percent);

        let event = BatteryStatusEvent {
            at: now,
            voltage,
            percent_of_range: percent,
            severity,
            event_type: "status",
            transition,
            delta_percent,
            rapid_drop: self.is_rapid_drop(delta_percent),
        };

        let recovered = matches!(
            self.latest.as_ref().map(|e| e.severity),
            Some(BatterySeverity::Warning) | Some(BatterySeverity::Critical)
        ) && severity == BatterySeverity::Info;

        self.latest = Some(event.clone());

        let mut events = Vec::with_capacity(2);
        if recovered {
            events.push(BatteryStatusEvent {
                severity: BatterySeverity::Info,
                event_type: "clear",
                transition: BatteryTransition::RecoverInfo,
                ..event.clone()
            });
        }
        events.push(event);
        events
    }

    pub fn is_critical(&self) -> bool {
        matches!(
            self.latest.as_ref().map(|e| e.severity),
            Some(BatterySeverity::Critical)
        )
    }

    fn warning_threshold(&self) -> f64 {
        (self.config.warning_percent / 100.0).clamp(0.0, 1.0)
    }

    fn critical_threshold(&self) -> f64 {
        let critical = (self.config.critical_percent / 100.0).clamp(0.0, 1.0);
        critical.min(self.warning_threshold())
    }

    fn derive_severity(&self, percent: f64) -> BatterySeverity {
        let warning = self.warning_threshold();
        let critical = self.critical_threshold();
        let hysteresis = self.config.hysteresis_percent.max(0.0) / 100.0;

        let previous = match self.latest.as_ref() {
            None => {
                return if percent <= critical {
                    BatterySeverity::Critical
                } else if percent <= warning {
                    BatterySeverity::Warning
                } else {
                    BatterySeverity::Info
                };
            }
            Some(event) => event.severity,
        };

        match previous {
            BatterySeverity::Critical => {
                if percent <= critical + hysteresis {
                    BatterySeverity::Critical
                } else if percent <= warning {
                    BatterySeverity::Warning
                } else {
                    BatterySeverity::Info
                }
            }
            BatterySeverity::Warning => {
                if percent <= critical {
                    BatterySeverity::Critical
                } else if percent <= warning + hysteresis {
                    BatterySeverity::Warning
                } else {
                    BatterySeverity::Info
                }
            }
            // Info state: require extra downward movement before warning.
            BatterySeverity::Info => {
                if percent <= critical {
                    BatterySeverity::Critical
                } else if percent <= (warning - hysteresis).max(0.0) {
                    BatterySeverity::Warning
                } else {
                    BatterySeverity::Info
                }
            }
        }
    }

    fn derive_transition(&self, severity: BatterySeverity, delta_percent: f64) -> BatteryTransition {
        let previous = match self.latest.as_ref() {
            None => return BatteryTransition::Initial(severity),
            Some(event) => event.severity,
        };
        if previous != severity {
            return match severity {
                BatterySeverity::Warning => BatteryTransition::EnterWarning,
                BatterySeverity::Critical => BatteryTransition::EnterCritical,
                BatterySeverity::Info => BatteryTransition::RecoverInfo,
            };
        }
        if delta_percent <= -self.rapid_drop_threshold_percent() {
            return BatteryTransition::DeltaDrop;
        }
        BatteryTransition::Steady(severity)
    }

    fn rapid_drop_threshold_percent(&self) -> f64 {
        self.config.hysteresis_percent.max(5.0)
    }

    fn is_rapid_drop(&self, delta_percent: f64) -> bool {
        delta_percent <= -self.rapid_drop_threshold_percent()
    }
}

/// Publishes battery status events on the bus with the event metadata
/// contract, deciding per event whether a model response is requested.
pub struct BatteryPublisher {
    bus: Arc<EventBus>,
    config: BatteryConfig,
    last_response_at: Option<Instant>,
    last_response_severity: Option<BatterySeverity>,
}

impl BatteryPublisher {
    pub fn new(bus: Arc<EventBus>, config: BatteryConfig) -> Self {
        Self {
            bus,
            config,
            last_response_at: None,
            last_response_severity: None,
        }
    }

    pub fn handle(&mut self, event: &BatteryStatusEvent, now: Instant) {
        let priority = match event.severity {
            BatterySeverity::Critical => Priority::Critical,
            BatterySeverity::Warning => Priority::High,
            BatterySeverity::Info => Priority::Low,
        };

        let request_response = self.should_request_response(event, now);
        if request_response {
            self.last_response_at = Some(now);
            self.last_response_severity = Some(event.severity);
        } else if event.severity == BatterySeverity::Info || event.event_type == "clear" {
            self.last_response_severity = None;
        }

        info!(
            voltage = event.voltage,
            severity = event.severity.as_str(),
            percent = event.percent_of_range,
            transition = %event.transition.label(),
            delta = event.delta_percent,
            rapid_drop = event.rapid_drop,
            "emitting battery event"
        );

        self.bus.publish(
            Event::new("battery", "status")
                .with_priority(priority)
                .with_dedupe_key("battery_status")
                .with_cooldown(Duration::from_secs_f64(self.config.response.cooldown_s))
                .with_request_response(request_response)
                .with_metadata(
                    [
                        ("voltage".to_string(), json!(event.voltage)),
                        ("percent_of_range".to_string(), json!(event.percent_of_range)),
                        ("severity".to_string(), json!(event.severity.as_str())),
                        ("event_type".to_string(), json!(event.event_type)),
                        ("transition".to_string(), json!(event.transition.label())),
                        ("delta_percent".to_string(), json!(event.delta_percent)),
                        ("rapid_drop".to_string(), json!(event.rapid_drop)),
                    ]
                    .into_iter()
                    .collect(),
                ),
            true,
        );
    }

    fn should_request_response(&self, event: &BatteryStatusEvent, now: Instant) -> bool {
        let response = &self.config.response;
        if !response.enabled {
            return false;
        }
        if event.event_type == "clear" || event.severity == BatterySeverity::Info {
            return false;
        }
        if event.severity == BatterySeverity::Warning && !response.allow_warning {
            return false;
        }
        if event.severity == BatterySeverity::Critical && !response.allow_critical {
            return false;
        }
        // Unchanged status never re-triggers chat.
        if event.transition.is_steady() {
            return false;
        }
        if response.require_transition && self.last_response_severity == Some(event.severity) {
            return false;
        }
        if response.cooldown_s <= 0.0 {
            return true;
        }
        match self.last_response_at {
            None => true,
            Some(at) => now.duration_since(at) >= Duration::from_secs_f64(response.cooldown_s),
        }
    }
}

/// Background sampling worker over a [`VoltageSource`].
///
/// Samples at the base period, tightening to the low-battery period while
/// the pack is at or below the critical threshold.
pub struct BatteryMonitor {
    source: Arc<dyn VoltageSource>,
    bus: Arc<EventBus>,
    config: BatteryConfig,
    latest: Arc<Mutex<Option<BatteryStatusEvent>>>,
    stop_tx: Option<Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl BatteryMonitor {
    pub fn new(source: Arc<dyn VoltageSource>, bus: Arc<EventBus>, config: BatteryConfig) -> Self {
        Self {
            source,
            bus,
            config,
            latest: Arc::new(Mutex::new(None)),
            stop_tx: None,
            thread: None,
        }
    }

    pub fn latest_event(&self) -> Option<BatteryStatusEvent> {
        self.latest.lock().clone()
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
        let latest = Arc::clone(&self.latest);
        let config = self.config.clone();
        let mut tracker = BatteryTracker::new(config.clone());
        let mut publisher = BatteryPublisher::new(Arc::clone(&self.bus), config.clone());
        let base_period = Duration::from_secs_f64(config.period_s.max(10.0));
        let low_period = Duration::from_secs_f64(config.low_battery_period_s.max(10.0));

        self.thread = Some(
            std::thread::Builder::new()
                .name("battery-monitor".into())
                .spawn(move || loop {
                    let now = Instant::now();
                    match source.read_battery_voltage() {
                        Ok(voltage) => {
                            for event in tracker.observe(voltage, now) {
                                publisher.handle(&event, now);
                                if event.event_type == "status" {
                                    *latest.lock() = Some(event);
                                }
                            }
                        }
                        Err(err) => error!(%err, "battery sample failed (retrying)"),
                    }
                    let period = if tracker.is_critical() { low_period } else { base_period };
                    if stop_rx.recv_timeout(period).is_ok() {
                        break;
                    }
                })
                .expect("spawn battery monitor thread"),
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

impl Drop for BatteryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
