// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashSet, VecDeque};

use tracing::debug;

use theo_config::AttentionConfig;

use crate::DetectionEvent;

/// Coarse attention mode deciding capture cadence and whether frames are
/// worth sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionState {
    Idle,
    Curious,
    Engaged,
    Cooldown,
}

impl AttentionState {
    pub fn as_str(self) -> &'static str {
        match self {
            AttentionState::Idle => "idle",
            AttentionState::Curious => "curious",
            AttentionState::Engaged => "engaged",
            AttentionState::Cooldown => "cooldown",
        }
    }
}

/// Idle↔Curious↔Engaged↔Cooldown state machine over MAD activity and
/// detections.
///
/// Engaged is only reachable from curious after the confirm duration of
/// continuous interesting signal; cooldown is only reachable from engaged.
pub struct AttentionController {
    config: AttentionConfig,
    /// Lower-cased label set; detector backends vary in casing
    interesting_labels: HashSet<String>,
    state: AttentionState,
    state_since_ms: u64,
    curious_started_ms: u64,
    mad_hits_ms: VecDeque<u64>,
    last_burst_ms: Option<u64>,
    burst_pending: u32,
}

impl AttentionController {
    pub fn new(config: AttentionConfig) -> Self {
        let interesting_labels = config
            .interesting_labels
            .iter()
            .map(|label| label.to_lowercase())
            .collect();
        Self {
            config,
            interesting_labels,
            state: AttentionState::Idle,
            state_since_ms: 0,
            curious_started_ms: 0,
            mad_hits_ms: VecDeque::new(),
            last_burst_ms: None,
            burst_pending: 0,
        }
    }

    pub fn state(&self) -> AttentionState {
        self.state
    }

    /// One tick of the machine. Transitions are ordered; the first match wins,
    /// so at most one transition happens per tick.
    pub fn update(
        &mut self,
        now_ms: u64,
        mad_changed: bool,
        detections: Option<&DetectionEvent>,
    ) -> AttentionState {
        if !self.config.enabled {
            self.state = AttentionState::Idle;
            return self.state;
        }

        let interesting = self.is_interesting(detections);

        if mad_changed {
            self.mad_hits_ms.push_back(now_ms);
        }
        let window = self.config.mad_window_ms;
        while let Some(&front) = self.mad_hits_ms.front() {
            if now_ms.saturating_sub(front) > window {
                self.mad_hits_ms.pop_front();
            } else {
                break;
            }
        }

        let next = match self.state {
            AttentionState::Idle => {
                if interesting || self.mad_hits_ms.len() as u32 >= self.config.mad_repeat_count {
                    Some(AttentionState::Curious)
                } else {
                    None
                }
            }
            AttentionState::Curious => {
                if interesting
                    && now_ms.saturating_sub(self.curious_started_ms)
                        >= self.config.engage_confirm_ms
                {
                    Some(AttentionState::Engaged)
                } else if !interesting
                    && now_ms.saturating_sub(self.state_since_ms) >= self.config.curious_timeout_ms
                {
                    Some(AttentionState::Idle)
                } else {
                    None
                }
            }
            AttentionState::Engaged => {
                if !interesting && !mad_changed {
                    Some(AttentionState::Cooldown)
                } else {
                    None
                }
            }
            AttentionState::Cooldown => {
                if interesting
                    && now_ms.saturating_sub(self.state_since_ms)
                        <= self.config.cooldown_reengage_window_ms
                {
                    Some(AttentionState::Engaged)
                } else if now_ms.saturating_sub(self.state_since_ms)
                    >= self.config.cooldown_timeout_ms
                {
                    Some(AttentionState::Idle)
                } else {
                    None
                }
            }
        };

        if let Some(next) = next {
            debug!(from = self.state.as_str(), to = next.as_str(), "attention transition");
            if next == AttentionState::Curious {
                self.curious_started_ms = now_ms;
            }
            if next == AttentionState::Engaged {
                self.arm_burst(now_ms);
            }
            self.state = next;
            self.state_since_ms = now_ms;
        }
        self.state
    }

    /// Capture period for the current state; engaged tightens the cadence.
    pub fn capture_period_ms(&self, state: AttentionState, base_period_ms: u64) -> u64 {
        if !self.config.enabled {
            return base_period_ms;
        }
        match state {
            AttentionState::Engaged => self.config.engaged_capture_period_ms,
            _ => base_period_ms,
        }
    }

    /// Whether a captured frame is worth sending upstream.
    pub fn should_send_image(
        &self,
        state: AttentionState,
        mad_changed: bool,
        detections: Option<&DetectionEvent>,
    ) -> bool {
        if !self.config.enabled {
            return mad_changed;
        }
        mad_changed
            || self.is_interesting(detections)
            || matches!(state, AttentionState::Curious | AttentionState::Engaged)
    }

    /// Burst frames armed on the last engaged entry, if any. Clears on read.
    pub fn take_burst_frames(&mut self) -> u32 {
        std::mem::take(&mut self.burst_pending)
    }

    fn arm_burst(&mut self, now_ms: u64) {
        let ready = match self.last_burst_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.config.burst_cooldown_ms,
        };
        if ready && self.config.burst_count > 0 {
            self.burst_pending = self.config.burst_count;
            self.last_burst_ms = Some(now_ms);
        }
    }

    fn is_interesting(&self, detections: Option<&DetectionEvent>) -> bool {
        let Some(event) = detections else { return false };
        event.detections.iter().any(|d| {
            d.confidence >= self.config.min_confidence
                && self.interesting_labels.contains(&d.label.to_lowercase())
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Detection;

    fn event(timestamp_ms: u64) -> DetectionEvent {
        DetectionEvent::new(
            timestamp_ms,
            vec![Detection::new("person", 0.9, (0.0, 0.0, 1.0, 1.0))],
        )
    }

    fn controller(config: AttentionConfig) -> AttentionController {
        AttentionController::new(config)
    }

    #[test]
    fn idle_to_curious_on_repeated_mad() {
        let mut c = controller(AttentionConfig {
            mad_repeat_count: 2,
            mad_window_ms: 500,
            engage_confirm_ms: 5000,
            ..AttentionConfig::default()
        });
        assert_eq!(c.update(1000, true, None), AttentionState::Idle);
        assert_eq!(c.update(1200, true, None), AttentionState::Curious);
    }

    #[test]
    fn stale_mad_hits_age_out_of_the_window() {
        let mut c = controller(AttentionConfig {
            mad_repeat_count: 2,
            mad_window_ms: 500,
            ..AttentionConfig::default()
        });
        assert_eq!(c.update(1000, true, None), AttentionState::Idle);
        // 700 ms later the first hit is out of the window.
        assert_eq!(c.update(1700, true, None), AttentionState::Idle);
    }

    #[test]
    fn curious_to_engaged_on_persistent_detection() {
        let mut c = controller(AttentionConfig {
            engage_confirm_ms: 300,
            ..AttentionConfig::default()
        });
        assert_eq!(c.update(1000, false, Some(&event(1000))), AttentionState::Curious);
        assert_eq!(c.update(1250, false, Some(&event(1250))), AttentionState::Curious);
        assert_eq!(c.update(1350, false, Some(&event(1350))), AttentionState::Engaged);
    }

    #[test]
    fn curious_times_out_back_to_idle() {
        let mut c = controller(AttentionConfig {
            curious_timeout_ms: 400,
            ..AttentionConfig::default()
        });
        c.update(1000, false, Some(&event(1000)));
        assert_eq!(c.state(), AttentionState::Curious);
        assert_eq!(c.update(1500, false, None), AttentionState::Idle);
    }

    #[test]
    fn engaged_to_cooldown_to_idle() {
        let mut c = controller(AttentionConfig {
            engage_confirm_ms: 0,
            cooldown_timeout_ms: 400,
            ..AttentionConfig::default()
        });
        c.update(1000, false, Some(&event(1000)));
        assert_eq!(c.update(1001, false, Some(&event(1001))), AttentionState::Engaged);
        assert_eq!(c.update(1200, false, None), AttentionState::Cooldown);
        assert_eq!(c.update(1700, false, None), AttentionState::Idle);
    }

    #[test]
    fn cooldown_immediate_reengage() {
        let mut c = controller(AttentionConfig {
            engage_confirm_ms: 0,
            cooldown_reengage_window_ms: 600,
            cooldown_timeout_ms: 2000,
            ..AttentionConfig::default()
        });
        c.update(1000, false, Some(&event(1000)));
        c.update(1001, false, Some(&event(1001)));
        assert_eq!(c.update(1300, false, None), AttentionState::Cooldown);
        assert_eq!(c.update(1600, false, Some(&event(1600))), AttentionState::Engaged);
    }

    #[test]
    fn mad_activity_keeps_engaged_alive() {
        let mut c = controller(AttentionConfig {
            engage_confirm_ms: 0,
            ..AttentionConfig::default()
        });
        c.update(1000, false, Some(&event(1000)));
        c.update(1001, false, Some(&event(1001)));
        assert_eq!(c.update(1100, true, None), AttentionState::Engaged);
    }

    #[test]
    fn disabled_mode_passthrough_behavior() {
        let mut c = controller(AttentionConfig {
            enabled: false,
            ..AttentionConfig::default()
        });
        assert_eq!(c.update(1000, true, Some(&event(1000))), AttentionState::Idle);
        assert_eq!(c.capture_period_ms(AttentionState::Engaged, 5000), 5000);
        assert!(!c.should_send_image(AttentionState::Idle, false, None));
        assert!(c.should_send_image(AttentionState::Idle, true, None));
    }

    #[test]
    fn low_confidence_detection_is_not_interesting() {
        let mut c = controller(AttentionConfig::default());
        let weak = DetectionEvent::new(
            1000,
            vec![Detection::new("person", 0.2, (0.0, 0.0, 1.0, 1.0))],
        );
        assert_eq!(c.update(1000, false, Some(&weak)), AttentionState::Idle);
    }

    #[test]
    fn unlisted_label_is_not_interesting() {
        let mut c = controller(AttentionConfig::default());
        let chair = DetectionEvent::new(
            1000,
            vec![Detection::new("chair", 0.99, (0.0, 0.0, 1.0, 1.0))],
        );
        assert_eq!(c.update(1000, false, Some(&chair)), AttentionState::Idle);
    }

    #[test]
    fn label_matching_ignores_case() {
        let mut c = controller(AttentionConfig {
            interesting_labels: vec!["Person".into(), "CAT".into()],
            ..AttentionConfig::default()
        });
        let event = DetectionEvent::new(
            1000,
            vec![Detection::new("PERSON", 0.9, (0.0, 0.0, 1.0, 1.0))],
        );
        assert_eq!(c.update(1000, false, Some(&event)), AttentionState::Curious);

        let mut c = controller(AttentionConfig::default());
        let event = DetectionEvent::new(
            1000,
            vec![Detection::new("Cat", 0.9, (0.0, 0.0, 1.0, 1.0))],
        );
        assert_eq!(c.update(1000, false, Some(&event)), AttentionState::Curious);
    }

    #[test]
    fn engaged_tightens_capture_period() {
        let c = controller(AttentionConfig::default());
        assert_eq!(c.capture_period_ms(AttentionState::Engaged, 15_000), 5000);
        assert_eq!(c.capture_period_ms(AttentionState::Idle, 15_000), 15_000);
    }

    #[test]
    fn burst_arms_once_per_cooldown() {
        let mut c = controller(AttentionConfig {
            engage_confirm_ms: 0,
            cooldown_reengage_window_ms: 10_000,
            burst_count: 2,
            burst_cooldown_ms: 20_000,
            ..AttentionConfig::default()
        });
        c.update(1000, false, Some(&event(1000)));
        c.update(1001, false, Some(&event(1001)));
        assert_eq!(c.take_burst_frames(), 2);
        assert_eq!(c.take_burst_frames(), 0);
        // Drop to cooldown and re-engage inside the burst cooldown.
        c.update(1100, false, None);
        c.update(1200, false, Some(&event(1200)));
        assert_eq!(c.state(), AttentionState::Engaged);
        assert_eq!(c.take_burst_frames(), 0);
    }
}
