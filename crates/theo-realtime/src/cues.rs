// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use theo_config::InteractionConfig;
use theo_motion::{GestureLibrary, MotionController};

use crate::{CueEvent, InteractionState};

/// Maps interaction-state transitions to motion cues.
///
/// Cues never fire while speaking, while the head is moving, or while other
/// actions are queued. Suppression for a busy queue is bounded: the cue is
/// dropped but its cooldown clock is not charged, so the next transition can
/// cue as soon as the queue empties.
pub struct CueDispatcher {
    motion: Arc<MotionController>,
    library: Arc<GestureLibrary>,
    config: InteractionConfig,
    last_fired: HashMap<String, Instant>,
    last_any: Option<Instant>,
}

impl CueDispatcher {
    pub fn new(
        motion: Arc<MotionController>,
        library: Arc<GestureLibrary>,
        config: InteractionConfig,
    ) -> Self {
        Self {
            motion,
            library,
            config,
            last_fired: HashMap::new(),
            last_any: None,
        }
    }

    /// Handle one transition cue. Returns the gesture queued, if any.
    pub fn handle(&mut self, cue: CueEvent) -> Option<&'static str> {
        self.handle_at(cue, Instant::now())
    }

    pub fn handle_at(&mut self, cue: CueEvent, now: Instant) -> Option<&'static str> {
        if !self.config.gesture_enabled {
            return None;
        }
        if cue.state == InteractionState::Speaking {
            debug!(state = cue.state.as_str(), "gesture cue skipped while speaking");
            return None;
        }

        let (gesture, delay_ms) = match cue.state {
            InteractionState::Listening => ("gesture_attention_snap", 0),
            InteractionState::Thinking => (
                "gesture_curious_tilt",
                rand::rng().random_range(150u64..=300),
            ),
            InteractionState::Idle if cue.previous == InteractionState::Speaking => {
                ("gesture_nod", 0)
            }
            _ => {
                debug!(state = cue.state.as_str(), "no gesture cue for transition");
                return None;
            }
        };

        if !self.motion.is_control_loop_alive() {
            debug!(gesture, "gesture cue skipped: motion controller not running");
            return None;
        }
        if self.motion.is_moving() {
            debug!(gesture, "gesture cue skipped: motion active");
            return None;
        }
        if self.motion.queue_len() > 0 {
            debug!(gesture, "gesture cue skipped: action queue not empty");
            return None;
        }

        if let Some(last_any) = self.last_any {
            let global = Duration::from_secs_f64(self.config.gesture_global_cooldown_s);
            if now.duration_since(last_any) < global {
                debug!(gesture, "gesture cue skipped: global cooldown");
                return None;
            }
        }
        let per_cooldown = Duration::from_secs_f64(
            self.config
                .gesture_cooldowns_s
                .get(gesture)
                .copied()
                .unwrap_or(0.0),
        );
        if let Some(&last) = self.last_fired.get(gesture) {
            if now.duration_since(last) < per_cooldown {
                debug!(gesture, "gesture cue skipped: per-gesture cooldown");
                return None;
            }
        }

        match self.library.build_action(&self.motion, gesture, delay_ms, 1.0) {
            Ok(action) => {
                self.motion.add_action_to_queue(action);
                self.last_fired.insert(gesture.to_string(), now);
                self.last_any = Some(now);
                info!(
                    state = cue.state.as_str(),
                    gesture, delay_ms, "gesture cue emitted"
                );
                Some(gesture)
            }
            Err(err) => {
                warn!(%err, gesture, "gesture cue skipped: no action built");
                None
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
