// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use theo_config::{BatteryResponseConfig, InjectionConfig};
use theo_events::{Event, Priority, RollingWindow};

use crate::{ClientEvent, OrchestrationPhase};

// ── External stimulus admission ───────────────────────────────────────────────

/// Gate deciding whether an external stimulus may enter the conversation.
///
/// Critical battery and IMU events are always admitted; everything else is
/// blocked during confirmation flows and active response generation, and is
/// subject to the injection-response budget plus per-trigger cooldowns.
pub struct StimulusGate {
    critical_sources: HashSet<String>,
    injection_budget: RollingWindow,
    default_trigger_cooldown: Duration,
    trigger_cooldowns: HashMap<String, Duration>,
    last_trigger_at: HashMap<String, Instant>,
}

impl StimulusGate {
    pub fn new(config: &InjectionConfig) -> Self {
        Self {
            critical_sources: ["battery", "imu"].iter().map(|s| s.to_string()).collect(),
            injection_budget: RollingWindow::new(
                "injection_responses",
                config.responses_per_minute,
                Duration::from_secs(60),
            ),
            default_trigger_cooldown: Duration::from_secs_f64(config.trigger_cooldown_s.max(0.0)),
            trigger_cooldowns: config
                .trigger_cooldowns_s
                .iter()
                .map(|(k, v)| (k.clone(), Duration::from_secs_f64(v.max(0.0))))
                .collect(),
            last_trigger_at: HashMap::new(),
        }
    }

    /// Admission check for an incoming stimulus. Returns `(allowed, reason)`.
    pub fn can_accept(
        &self,
        event: &Event,
        phase: OrchestrationPhase,
        response_in_progress: bool,
    ) -> (bool, String) {
        if self.is_critical_sensor_event(event) {
            return (
                true,
                format!("phase={} critical_source_bypass", phase.as_str()),
            );
        }
        if phase == OrchestrationPhase::AwaitingConfirmation {
            return (false, "awaiting_confirmation_policy".into());
        }
        if response_in_progress {
            return (false, "response_in_progress".into());
        }
        (true, format!("phase={}", phase.as_str()))
    }

    /// Budget + per-trigger cooldown for a stimulus-triggered response.
    /// Passing the check records both.
    pub fn allow_injection_response(&mut self, trigger: &str, now: Instant) -> bool {
        if !self.injection_budget.allow(now) {
            debug!(trigger, "injection response denied: budget exhausted");
            return false;
        }
        let cooldown = self
            .trigger_cooldowns
            .get(trigger)
            .copied()
            .unwrap_or(self.default_trigger_cooldown);
        if let Some(&last) = self.last_trigger_at.get(trigger) {
            if now.duration_since(last) < cooldown {
                debug!(trigger, "injection response denied: trigger cooldown");
                return false;
            }
        }
        self.injection_budget.record(now);
        self.last_trigger_at.insert(trigger.to_string(), now);
        true
    }

    fn is_critical_sensor_event(&self, event: &Event) -> bool {
        if !self.critical_sources.contains(&event.source) {
            return false;
        }
        event.priority == Priority::Critical
            || event.metadata.get("severity").and_then(Value::as_str) == Some("critical")
    }
}

// ── Deferred response.create queue ────────────────────────────────────────────

/// A `response.create` held back by the confirmation flow or an in-flight
/// response.
#[derive(Debug, Clone)]
pub struct QueuedResponse {
    pub event: ClientEvent,
    pub origin: String,
}

impl QueuedResponse {
    fn is_approval_flow(&self) -> bool {
        match &self.event {
            ClientEvent::ResponseCreate { response: Some(params) } => {
                params.metadata.get("approval_flow").map(String::as_str) == Some("true")
            }
            _ => false,
        }
    }
}

/// FIFO of deferred `response.create` requests.
///
/// While confirmation is pending, injected requests stay queued; the
/// approval-flow prompt itself passes through even when queued behind a
/// blocked injection.
#[derive(Default)]
pub struct ResponseQueue {
    queue: VecDeque<QueuedResponse>,
}

impl ResponseQueue {
    pub fn push(&mut self, queued: QueuedResponse) {
        self.queue.push_back(queued);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether a fresh request with this origin must queue instead of send.
    pub fn should_defer(
        origin: &str,
        approval_flow: bool,
        phase: OrchestrationPhase,
        response_in_progress: bool,
    ) -> bool {
        if approval_flow || origin == "user_text" {
            return false;
        }
        phase == OrchestrationPhase::AwaitingConfirmation || response_in_progress
    }

    /// Remove and return every entry that may be sent now. Blocked entries
    /// keep their order; approval prompts are released past a blocked head.
    pub fn drain_sendable(
        &mut self,
        phase: OrchestrationPhase,
        response_in_progress: bool,
    ) -> Vec<QueuedResponse> {
        let mut sendable = Vec::new();
        let mut kept = VecDeque::new();
        while let Some(entry) = self.queue.pop_front() {
            let blocked = Self::should_defer(
                &entry.origin,
                entry.is_approval_flow(),
                phase,
                response_in_progress,
            );
            if blocked {
                kept.push_back(entry);
            } else {
                sendable.push(entry);
            }
        }
        self.queue = kept;
        sendable
    }
}

// ── Battery response policy ───────────────────────────────────────────────────

const BATTERY_QUERY_KEYWORDS: &[&str] = &[
    "battery",
    "charge",
    "charging",
    "voltage",
    "power level",
    "how much juice",
];

/// True when user text reads as a battery status question.
pub fn is_battery_status_query(text: &str) -> bool {
    let normalized = text.to_lowercase();
    BATTERY_QUERY_KEYWORDS
        .iter()
        .any(|keyword| normalized.contains(keyword))
}

/// Decides when a battery status event may request a model response.
///
/// By default status updates are silent; a response is requested only on a
/// critical severity, on a transition into warning/critical, or while the
/// user recently asked about the battery.
pub struct BatteryResponsePolicy {
    config: BatteryResponseConfig,
    last_battery_query_at: Option<Instant>,
}

impl BatteryResponsePolicy {
    pub fn new(config: BatteryResponseConfig) -> Self {
        Self {
            config,
            last_battery_query_at: None,
        }
    }

    /// Track user input so a battery question opens the response window.
    pub fn record_user_input(&mut self, text: &str, now: Instant) {
        if is_battery_status_query(text) {
            self.last_battery_query_at = Some(now);
        }
    }

    pub fn query_context_active(&self, now: Instant) -> bool {
        self.last_battery_query_at.is_some_and(|at| {
            now.duration_since(at)
                < Duration::from_secs_f64(self.config.query_context_window_s.max(0.0))
        })
    }

    /// Whether this battery event should request a response. `fallback` is
    /// the event's own request_response flag.
    pub fn should_request_response(
        &self,
        metadata: &HashMap<String, Value>,
        fallback: bool,
        now: Instant,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.query_context_active(now) {
            return true;
        }

        let severity = metadata.get("severity").and_then(Value::as_str).unwrap_or("info");
        let event_type = metadata.get("event_type").and_then(Value::as_str).unwrap_or("status");
        let transition = metadata.get("transition").and_then(Value::as_str).unwrap_or("");

        if event_type == "clear" {
            return false;
        }
        match severity {
            "critical" => self.config.allow_critical,
            "warning" => {
                self.config.allow_warning
                    && (transition == "enter_warning" || transition == "enter_critical")
            }
            _ => fallback,
        }
    }
}

// ── Injection formatting ──────────────────────────────────────────────────────

/// Render a bus event into the text injected into the conversation.
/// Returns the message and the default request-response flag.
pub fn format_event_for_injection(event: &Event) -> (String, bool) {
    let default_request = event.request_response.unwrap_or(false);
    match event.source.as_str() {
        "battery" => {
            let voltage = event.metadata.get("voltage").and_then(Value::as_f64).unwrap_or(0.0);
            let severity = event
                .metadata
                .get("severity")
                .and_then(Value::as_str)
                .unwrap_or("info");
            let transition = event
                .metadata
                .get("transition")
                .and_then(Value::as_str)
                .unwrap_or("steady");
            let percent = event
                .metadata
                .get("percent_of_range")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            (
                format!(
                    "[battery] voltage={voltage:.2}V percent={:.0}% severity={severity} transition={transition}",
                    percent * 100.0
                ),
                default_request,
            )
        }
        "imu" => {
            let event_type = event
                .metadata
                .get("event_type")
                .and_then(Value::as_str)
                .unwrap_or("motion");
            let severity = event
                .metadata
                .get("severity")
                .and_then(Value::as_str)
                .unwrap_or("notice");
            let details = event
                .metadata
                .get("details")
                .map(|d| d.to_string())
                .unwrap_or_default();
            (
                format!("[imu] event={event_type} severity={severity} details={details}"),
                default_request,
            )
        }
        "alert" => (
            format!("[alert] {}", event.content.as_deref().unwrap_or("(no message)")),
            default_request,
        ),
        "research" => (
            event.content.clone().unwrap_or_default(),
            event.request_response.unwrap_or(true),
        ),
        _ => (
            event
                .content
                .clone()
                .unwrap_or_else(|| format!("[{}] {}", event.source, event.kind)),
            default_request,
        ),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ResponseParams;

    fn battery_event(priority: Priority, severity: &str) -> Event {
        Event::new("battery", "status")
            .with_priority(priority)
            .with_metadata_entry("severity", json!(severity))
    }

    // ── Stimulus admission ────────────────────────────────────────────────────

    #[test]
    fn critical_battery_admitted_during_confirmation() {
        let gate = StimulusGate::new(&InjectionConfig::default());
        let (allowed, reason) = gate.can_accept(
            &battery_event(Priority::Critical, "critical"),
            OrchestrationPhase::AwaitingConfirmation,
            false,
        );
        assert!(allowed);
        assert!(reason.starts_with("phase="));
    }

    #[test]
    fn critical_severity_metadata_also_bypasses() {
        let gate = StimulusGate::new(&InjectionConfig::default());
        let (allowed, _) = gate.can_accept(
            &battery_event(Priority::High, "critical"),
            OrchestrationPhase::AwaitingConfirmation,
            true,
        );
        assert!(allowed);
    }

    #[test]
    fn routine_battery_blocked_during_confirmation() {
        let gate = StimulusGate::new(&InjectionConfig::default());
        let (allowed, reason) = gate.can_accept(
            &battery_event(Priority::High, "warning"),
            OrchestrationPhase::AwaitingConfirmation,
            false,
        );
        assert!(!allowed);
        assert_eq!(reason, "awaiting_confirmation_policy");
    }

    #[test]
    fn camera_blocked_while_response_in_progress() {
        let gate = StimulusGate::new(&InjectionConfig::default());
        let event = Event::new("camera", "image");
        let (allowed, reason) = gate.can_accept(&event, OrchestrationPhase::Idle, true);
        assert!(!allowed);
        assert_eq!(reason, "response_in_progress");
    }

    #[test]
    fn critical_camera_event_is_not_a_sensor_bypass() {
        let gate = StimulusGate::new(&InjectionConfig::default());
        let event = Event::new("camera", "image").with_priority(Priority::Critical);
        let (allowed, _) =
            gate.can_accept(&event, OrchestrationPhase::AwaitingConfirmation, false);
        assert!(!allowed);
    }

    #[test]
    fn idle_phase_admits_normal_events() {
        let gate = StimulusGate::new(&InjectionConfig::default());
        let event = Event::new("camera", "image");
        let (allowed, _) = gate.can_accept(&event, OrchestrationPhase::Idle, false);
        assert!(allowed);
    }

    // ── Injection response budget/cooldown ────────────────────────────────────

    #[test]
    fn injection_budget_caps_responses_per_minute() {
        let mut gate = StimulusGate::new(&InjectionConfig {
            responses_per_minute: 2,
            trigger_cooldown_s: 0.0,
            trigger_cooldowns_s: HashMap::new(),
        });
        let now = Instant::now();
        assert!(gate.allow_injection_response("a", now));
        assert!(gate.allow_injection_response("b", now));
        assert!(!gate.allow_injection_response("c", now));
        assert!(gate.allow_injection_response("d", now + Duration::from_secs(61)));
    }

    #[test]
    fn per_trigger_cooldown_applies() {
        let mut gate = StimulusGate::new(&InjectionConfig {
            responses_per_minute: 0,
            trigger_cooldown_s: 10.0,
            trigger_cooldowns_s: HashMap::new(),
        });
        let now = Instant::now();
        assert!(gate.allow_injection_response("image_message", now));
        assert!(!gate.allow_injection_response("image_message", now + Duration::from_secs(5)));
        // A different trigger is independent.
        assert!(gate.allow_injection_response("battery_alert", now + Duration::from_secs(5)));
        assert!(gate.allow_injection_response("image_message", now + Duration::from_secs(11)));
    }

    // ── Response queue ────────────────────────────────────────────────────────

    fn injection_entry(trigger: &str) -> QueuedResponse {
        QueuedResponse {
            event: ClientEvent::ResponseCreate {
                response: Some(ResponseParams::with_trigger(trigger, "injection")),
            },
            origin: "injection".into(),
        }
    }

    fn approval_entry() -> QueuedResponse {
        QueuedResponse {
            event: ClientEvent::ResponseCreate {
                response: Some(ResponseParams::approval_flow("assistant_message")),
            },
            origin: "assistant_message".into(),
        }
    }

    #[test]
    fn image_trigger_defers_during_confirmation() {
        assert!(ResponseQueue::should_defer(
            "injection",
            false,
            OrchestrationPhase::AwaitingConfirmation,
            false
        ));
    }

    #[test]
    fn user_text_passes_during_confirmation() {
        assert!(!ResponseQueue::should_defer(
            "user_text",
            false,
            OrchestrationPhase::AwaitingConfirmation,
            false
        ));
    }

    #[test]
    fn drain_keeps_blocked_injection_while_confirmation_pending() {
        let mut queue = ResponseQueue::default();
        queue.push(injection_entry("image_message"));
        let sent = queue.drain_sendable(OrchestrationPhase::AwaitingConfirmation, false);
        assert!(sent.is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_releases_approval_prompt() {
        let mut queue = ResponseQueue::default();
        queue.push(approval_entry());
        let sent = queue.drain_sendable(OrchestrationPhase::AwaitingConfirmation, false);
        assert_eq!(sent.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_skips_blocked_head_and_releases_approval_prompt() {
        let mut queue = ResponseQueue::default();
        queue.push(injection_entry("image_message"));
        queue.push(approval_entry());
        let sent = queue.drain_sendable(OrchestrationPhase::AwaitingConfirmation, false);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].origin, "assistant_message");
        assert_eq!(queue.len(), 1);
        match &queue.queue[0].event {
            ClientEvent::ResponseCreate { response: Some(params) } => {
                assert_eq!(params.metadata.get("trigger").map(String::as_str), Some("image_message"));
            }
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn drain_releases_everything_once_idle() {
        let mut queue = ResponseQueue::default();
        queue.push(injection_entry("image_message"));
        queue.push(approval_entry());
        let sent = queue.drain_sendable(OrchestrationPhase::Idle, false);
        assert_eq!(sent.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn in_flight_response_defers_injections() {
        let mut queue = ResponseQueue::default();
        queue.push(injection_entry("image_message"));
        let sent = queue.drain_sendable(OrchestrationPhase::Idle, true);
        assert!(sent.is_empty());
        assert_eq!(queue.len(), 1);
    }

    // ── Battery response policy ───────────────────────────────────────────────

    fn metadata(severity: &str, event_type: &str, transition: &str) -> HashMap<String, Value> {
        [
            ("severity".to_string(), json!(severity)),
            ("event_type".to_string(), json!(event_type)),
            ("transition".to_string(), json!(transition)),
        ]
        .into_iter()
        .collect()
    }

    fn policy() -> BatteryResponsePolicy {
        BatteryResponsePolicy::new(BatteryResponseConfig::default())
    }

    #[test]
    fn steady_warning_does_not_request_response() {
        let policy = policy();
        assert!(!policy.should_request_response(
            &metadata("warning", "status", "steady_warning"),
            false,
            Instant::now()
        ));
    }

    #[test]
    fn enter_warning_requests_response() {
        let policy = policy();
        assert!(policy.should_request_response(
            &metadata("warning", "status", "enter_warning"),
            false,
            Instant::now()
        ));
    }

    #[test]
    fn critical_requests_response_even_when_steady() {
        let policy = policy();
        assert!(policy.should_request_response(
            &metadata("critical", "status", "steady_critical"),
            false,
            Instant::now()
        ));
    }

    #[test]
    fn clear_event_never_requests_response() {
        let policy = policy();
        assert!(!policy.should_request_response(
            &metadata("info", "clear", "recover_info"),
            true,
            Instant::now()
        ));
    }

    #[test]
    fn battery_query_detection() {
        assert!(is_battery_status_query("how's battery?"));
        assert!(is_battery_status_query("what is the VOLTAGE right now"));
        assert!(!is_battery_status_query("tell me a joke"));
    }

    #[test]
    fn query_context_window_allows_info_response() {
        let mut policy = policy();
        let now = Instant::now();
        policy.record_user_input("how's battery?", now);
        assert!(policy.query_context_active(now + Duration::from_secs(10)));
        assert!(policy.should_request_response(
            &metadata("info", "status", "steady_info"),
            false,
            now + Duration::from_secs(10)
        ));
    }

    #[test]
    fn query_context_expires_after_window() {
        let mut policy = policy();
        let now = Instant::now();
        policy.record_user_input("what's the battery voltage?", now);
        assert!(!policy.query_context_active(now + Duration::from_secs(46)));
    }

    #[test]
    fn non_battery_text_does_not_open_the_window() {
        let mut policy = policy();
        let now = Instant::now();
        policy.record_user_input("tell me a story", now);
        assert!(!policy.query_context_active(now));
    }

    #[test]
    fn disabled_policy_is_always_silent() {
        let policy = BatteryResponsePolicy::new(BatteryResponseConfig {
            enabled: false,
            ..BatteryResponseConfig::default()
        });
        assert!(!policy.should_request_response(
            &metadata("critical", "status", "enter_critical"),
            true,
            Instant::now()
        ));
    }
}
