// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::info;

use theo_config::InteractionConfig;

/// Interaction states for realtime UX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl InteractionState {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionState::Idle => "idle",
            InteractionState::Listening => "listening",
            InteractionState::Thinking => "thinking",
            InteractionState::Speaking => "speaking",
        }
    }
}

/// A state transition that may warrant a motion cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueEvent {
    pub state: InteractionState,
    pub previous: InteractionState,
}

/// Tracks interaction state transitions and emits cue events.
///
/// Cue dispatch is decoupled through a channel: the manager decides *when*
/// a cue fires (min-duration gate, per-state delay, cancellation on a
/// faster transition) and the dispatcher decides *what* motion results.
pub struct InteractionStateManager {
    config: InteractionConfig,
    state: InteractionState,
    last_transition: Instant,
    last_cue: Option<Instant>,
    pending: Option<tokio::task::JoinHandle<()>>,
    cue_tx: Option<mpsc::UnboundedSender<CueEvent>>,
}

impl InteractionStateManager {
    pub fn new(config: InteractionConfig) -> Self {
        Self {
            config,
            state: InteractionState::Idle,
            last_transition: Instant::now(),
            last_cue: None,
            pending: None,
            cue_tx: None,
        }
    }

    pub fn set_cue_channel(&mut self, cue_tx: mpsc::UnboundedSender<CueEvent>) {
        self.cue_tx = Some(cue_tx);
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    /// Apply a transition. Returns false when the state is unchanged.
    pub fn update_state(&mut self, new_state: InteractionState, reason: &str) -> bool {
        if new_state == self.state {
            return false;
        }
        let now = Instant::now();
        let previous = self.state;
        self.state = new_state;
        self.last_transition = now;
        info!(
            from = previous.as_str(),
            to = new_state.as_str(),
            reason,
            "interaction state transition"
        );

        // A faster transition cancels the slower state's pending cue.
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }

        if !self.config.cues_enabled {
            return true;
        }
        let elapsed_since_cue = self
            .last_cue
            .map(|at| now.duration_since(at))
            .unwrap_or(Duration::MAX);
        if elapsed_since_cue < Duration::from_millis(self.config.min_state_duration_ms) {
            return true;
        }

        let cue = CueEvent {
            state: new_state,
            previous,
        };
        let delay_ms = self
            .config
            .cue_delays_ms
            .get(new_state.as_str())
            .copied()
            .unwrap_or(0);
        self.last_cue = Some(now);

        let Some(cue_tx) = self.cue_tx.clone() else { return true };
        if delay_ms == 0 {
            let _ = cue_tx.send(cue);
        } else {
            self.pending = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let _ = cue_tx.send(cue);
            }));
        }
        true
    }
}

/// Coarse orchestration phase gating which stimuli the session accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationPhase {
    Sense,
    Plan,
    Act,
    Reflect,
    Idle,
    AwaitingConfirmation,
}

impl OrchestrationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            OrchestrationPhase::Sense => "sense",
            OrchestrationPhase::Plan => "plan",
            OrchestrationPhase::Act => "act",
            OrchestrationPhase::Reflect => "reflect",
            OrchestrationPhase::Idle => "idle",
            OrchestrationPhase::AwaitingConfirmation => "awaiting_confirmation",
        }
    }
}

#[derive(Debug)]
pub struct OrchestrationState {
    phase: OrchestrationPhase,
}

impl OrchestrationState {
    pub fn new() -> Self {
        Self {
            phase: OrchestrationPhase::Idle,
        }
    }

    pub fn phase(&self) -> OrchestrationPhase {
        self.phase
    }

    pub fn transition(&mut self, phase: OrchestrationPhase, reason: &str) {
        if phase == self.phase {
            return;
        }
        info!(
            from = self.phase.as_str(),
            to = phase.as_str(),
            reason,
            "orchestration phase transition"
        );
        self.phase = phase;
    }
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
