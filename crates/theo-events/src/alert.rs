// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use theo_config::AlertsConfig;

use crate::{Event, EventBus, Priority};

/// Alert severity as reported by the producing subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Critical,
    High,
    Warning,
    Info,
    Low,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::High => "high",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
            AlertSeverity::Low => "low",
        }
    }

    /// Bus priority for this severity.
    fn priority(self) -> Priority {
        match self {
            AlertSeverity::Critical => Priority::Critical,
            AlertSeverity::High | AlertSeverity::Warning => Priority::High,
            AlertSeverity::Info => Priority::Normal,
            AlertSeverity::Low => Priority::Low,
        }
    }

    fn wants_response(self) -> bool {
        matches!(self, AlertSeverity::Critical | AlertSeverity::High)
    }
}

/// Alert payload definition.
#[derive(Debug, Clone)]
pub struct Alert {
    pub key: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub metadata: HashMap<String, Value>,
    pub ttl: Option<Duration>,
    pub cooldown: Option<Duration>,
    pub request_response: Option<bool>,
}

impl Alert {
    pub fn new(key: impl Into<String>, message: impl Into<String>, severity: AlertSeverity) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
            severity,
            metadata: HashMap::new(),
            ttl: None,
            cooldown: None,
            request_response: None,
        }
    }
}

/// Converts alerts into coalescing bus events with cooldown and TTL.
///
/// Per-key cooldown is enforced here; an alert inside its window is
/// suppressed and `emit` returns false.
pub struct AlertPolicy {
    cooldown: Duration,
    ttl: Duration,
    last_emitted: Mutex<HashMap<String, Instant>>,
}

impl AlertPolicy {
    pub fn new(cooldown: Duration, ttl: Duration) -> Self {
        Self {
            cooldown,
            ttl,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AlertsConfig) -> Self {
        Self::new(
            Duration::from_secs_f64(config.cooldown_s.max(0.0)),
            Duration::from_secs_f64(config.ttl_s.max(0.0)),
        )
    }

    pub fn emit(&self, bus: &EventBus, alert: Alert) -> bool {
        self.emit_at(bus, alert, Instant::now())
    }

    pub fn emit_at(&self, bus: &EventBus, alert: Alert, now: Instant) -> bool {
        let cooldown = alert.cooldown.unwrap_or(self.cooldown);
        {
            let mut last = self.last_emitted.lock();
            if let Some(&sent) = last.get(&alert.key) {
                if now.duration_since(sent) < cooldown {
                    return false;
                }
            }
            last.insert(alert.key.clone(), now);
        }

        let ttl = alert.ttl.unwrap_or(self.ttl);
        let request_response = alert
            .request_response
            .unwrap_or_else(|| alert.severity.wants_response());

        let mut metadata = alert.metadata;
        metadata.insert("severity".into(), Value::String(alert.severity.as_str().into()));

        bus.publish(
            Event::new("alert", "alert")
                .with_priority(alert.severity.priority())
                .with_content(alert.message)
                .with_metadata(metadata)
                .with_dedupe_key(alert.key)
                .with_ttl(ttl)
                .with_cooldown(cooldown)
                .with_request_response(request_response),
            true,
        );
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AlertPolicy {
        AlertPolicy::new(Duration::from_secs(60), Duration::from_secs(120))
    }

    #[test]
    fn severity_maps_to_bus_priority() {
        assert_eq!(AlertSeverity::Critical.priority(), Priority::Critical);
        assert_eq!(AlertSeverity::High.priority(), Priority::High);
        assert_eq!(AlertSeverity::Warning.priority(), Priority::High);
        assert_eq!(AlertSeverity::Info.priority(), Priority::Normal);
        assert_eq!(AlertSeverity::Low.priority(), Priority::Low);
    }

    #[test]
    fn emits_coalescing_event_with_defaults() {
        let bus = EventBus::new(10);
        let policy = policy();
        assert!(policy.emit(&bus, Alert::new("imu_tilt", "tilted", AlertSeverity::Warning)));

        let event = bus.get_next(Duration::from_millis(1)).unwrap();
        assert_eq!(event.source, "alert");
        assert_eq!(event.priority, Priority::High);
        assert_eq!(event.dedupe_key.as_deref(), Some("imu_tilt"));
        assert_eq!(event.ttl, Some(Duration::from_secs(120)));
        assert_eq!(event.request_response, Some(true));
        assert_eq!(event.metadata["severity"], serde_json::json!("warning"));
    }

    #[test]
    fn info_alert_does_not_request_response() {
        let bus = EventBus::new(10);
        policy().emit(&bus, Alert::new("note", "fyi", AlertSeverity::Info));
        let event = bus.get_next(Duration::from_millis(1)).unwrap();
        assert_eq!(event.request_response, Some(false));
    }

    #[test]
    fn per_key_cooldown_suppresses_repeat() {
        let bus = EventBus::new(10);
        let policy = policy();
        let t0 = Instant::now();
        assert!(policy.emit_at(&bus, Alert::new("k", "first", AlertSeverity::High), t0));
        assert!(!policy.emit_at(
            &bus,
            Alert::new("k", "second", AlertSeverity::High),
            t0 + Duration::from_secs(30)
        ));
        assert!(policy.emit_at(
            &bus,
            Alert::new("k", "third", AlertSeverity::High),
            t0 + Duration::from_secs(61)
        ));
    }

    #[test]
    fn different_keys_do_not_share_cooldown() {
        let bus = EventBus::new(10);
        let policy = policy();
        let t0 = Instant::now();
        assert!(policy.emit_at(&bus, Alert::new("a", "m", AlertSeverity::High), t0));
        assert!(policy.emit_at(&bus, Alert::new("b", "m", AlertSeverity::High), t0));
    }

    #[test]
    fn explicit_request_response_wins_over_severity() {
        let bus = EventBus::new(10);
        let mut alert = Alert::new("k", "quiet critical", AlertSeverity::Critical);
        alert.request_response = Some(false);
        policy().emit(&bus, alert);
        let event = bus.get_next(Duration::from_millis(1)).unwrap();
        assert_eq!(event.request_response, Some(false));
    }
}
