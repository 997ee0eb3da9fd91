// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use theo_config::CameraConfig;

/// Interest state for camera change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraInterestState {
    Boring,
    Interesting,
}

/// Result of a single policy update.
#[derive(Debug, Clone, Copy)]
pub struct CameraChangeResult {
    pub mad: f64,
    pub ema_mad: f64,
    pub state: CameraInterestState,
    pub state_changed: bool,
    pub debounce_count: u32,
    pub promoted: bool,
    pub cooldown_remaining_s: f64,
}

/// Mean absolute difference between two low-resolution luma frames.
pub fn mean_abs_diff(previous: &[u8], next: &[u8]) -> f64 {
    let len = previous.len().min(next.len());
    if len == 0 {
        return 0.0;
    }
    let sum: u64 = previous[..len]
        .iter()
        .zip(&next[..len])
        .map(|(&a, &b)| (a as i16 - b as i16).unsigned_abs() as u64)
        .sum();
    sum as f64 / len as f64
}

/// EMA + hysteresis + debounce state machine deciding when visual change is
/// worth promoting.
///
/// A boring→interesting flip needs `debounce_frames` consecutive samples over
/// the trigger threshold; promotions fire at most once per cooldown window;
/// clearing needs the same debounce below the (lower) clear threshold.
pub struct CameraChangePolicy {
    config: CameraConfig,
    state: CameraInterestState,
    ema_mad: Option<f64>,
    debounce_count: u32,
    cooldown_until_s: f64,
}

impl CameraChangePolicy {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            state: CameraInterestState::Boring,
            ema_mad: None,
            debounce_count: 0,
            cooldown_until_s: 0.0,
        }
    }

    pub fn state(&self) -> CameraInterestState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = CameraInterestState::Boring;
        self.ema_mad = None;
        self.debounce_count = 0;
        self.cooldown_until_s = 0.0;
    }

    pub fn update(&mut self, mad: f64, now_s: f64) -> CameraChangeResult {
        let ema_mad = match self.ema_mad {
            None => mad,
            Some(previous) => {
                let alpha = self.config.ema_alpha;
                alpha * mad + (1.0 - alpha) * previous
            }
        };
        self.ema_mad = Some(ema_mad);

        let mut promoted = false;
        let mut state_changed = false;
        let debounce_frames = self.config.debounce_frames.max(1);

        match self.state {
            CameraInterestState::Boring => {
                if ema_mad >= self.config.trigger_threshold {
                    self.debounce_count += 1;
                    if self.debounce_count >= debounce_frames {
                        self.state = CameraInterestState::Interesting;
                        state_changed = true;
                        self.debounce_count = 0;
                        if now_s >= self.cooldown_until_s {
                            promoted = true;
                            self.cooldown_until_s = now_s + self.config.cooldown_seconds;
                        }
                    }
                } else {
                    self.debounce_count = 0;
                }
            }
            CameraInterestState::Interesting => {
                if ema_mad <= self.config.clear_threshold {
                    self.debounce_count += 1;
                    if self.debounce_count >= debounce_frames {
                        self.state = CameraInterestState::Boring;
                        state_changed = true;
                        self.debounce_count = 0;
                    }
                } else {
                    self.debounce_count = 0;
                }
            }
        }

        CameraChangeResult {
            mad,
            ema_mad,
            state: self.state,
            state_changed,
            debounce_count: self.debounce_count,
            promoted,
            cooldown_remaining_s: (self.cooldown_until_s - now_s).max(0.0),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CameraChangePolicy {
        CameraChangePolicy::new(CameraConfig::default())
    }

    #[test]
    fn noisy_sequence_produces_zero_promotions() {
        // 1 Hz MAD samples oscillating around the thresholds never satisfy
        // the debounce, so nothing promotes.
        let mut policy = policy();
        let samples = [20.0, 26.0, 21.0, 27.0, 22.0, 25.0, 19.0, 24.0];
        let mut promotions = 0;
        for (i, &mad) in samples.iter().enumerate() {
            let result = policy.update(mad, i as f64);
            if result.promoted {
                promotions += 1;
            }
        }
        assert_eq!(promotions, 0);
        assert_eq!(policy.state(), CameraInterestState::Boring);
    }

    #[test]
    fn sustained_change_promotes_after_debounce() {
        let mut policy = policy();
        let mut now = 0.0;
        let mut promoted_at = None;
        for i in 0..5 {
            let result = policy.update(60.0, now);
            if result.promoted {
                promoted_at = Some(i);
                break;
            }
            now += 1.0;
        }
        // EMA needs a couple of samples to cross 25, then 3 debounce frames.
        assert!(promoted_at.is_some());
        assert_eq!(policy.state(), CameraInterestState::Interesting);
    }

    #[test]
    fn at_most_one_promotion_per_cooldown_window() {
        let mut policy = policy();
        let mut promotions = 0;
        let mut now = 0.0;
        // Drive interesting, clear, and interesting again inside 10 s.
        for _ in 0..6 {
            if policy.update(80.0, now).promoted {
                promotions += 1;
            }
            now += 0.5;
        }
        for _ in 0..8 {
            policy.update(0.0, now);
            now += 0.5;
        }
        for _ in 0..6 {
            if policy.update(80.0, now).promoted {
                promotions += 1;
            }
            now += 0.5;
        }
        assert_eq!(promotions, 1);
    }

    #[test]
    fn promotion_possible_again_after_cooldown() {
        let mut policy = policy();
        let mut promotions = 0;
        let mut now = 0.0;
        for _ in 0..6 {
            if policy.update(80.0, now).promoted {
                promotions += 1;
            }
            now += 1.0;
        }
        // Clear well past the cooldown, then trigger again.
        now += 15.0;
        for _ in 0..8 {
            policy.update(0.0, now);
            now += 1.0;
        }
        for _ in 0..6 {
            if policy.update(80.0, now).promoted {
                promotions += 1;
            }
            now += 1.0;
        }
        assert_eq!(promotions, 2);
    }

    #[test]
    fn clearing_requires_debounce_below_clear_threshold() {
        let mut policy = policy();
        let mut now = 0.0;
        for _ in 0..6 {
            policy.update(80.0, now);
            now += 1.0;
        }
        assert_eq!(policy.state(), CameraInterestState::Interesting);
        // One quiet sample is not enough.
        policy.update(0.0, now);
        assert_eq!(policy.state(), CameraInterestState::Interesting);
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut policy = policy();
        for i in 0..6 {
            policy.update(80.0, i as f64);
        }
        policy.reset();
        assert_eq!(policy.state(), CameraInterestState::Boring);
    }

    #[test]
    fn mean_abs_diff_over_luma_frames() {
        assert_eq!(mean_abs_diff(&[10, 20, 30], &[10, 20, 30]), 0.0);
        assert_eq!(mean_abs_diff(&[0, 0], &[10, 20]), 15.0);
        assert_eq!(mean_abs_diff(&[], &[]), 0.0);
        // Mismatched lengths compare the common prefix.
        assert_eq!(mean_abs_diff(&[0, 0, 0], &[6, 6]), 6.0);
    }
}
