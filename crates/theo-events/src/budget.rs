// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Generic N-per-window limiter over a FIFO of monotonic timestamps.
///
/// A limit of 0 behaves as unlimited. Used for tool calls per minute,
/// expensive calls per day, injection responses per minute, and the daily
/// research budget.
pub struct RollingWindow {
    name: String,
    limit: u32,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RollingWindow {
    pub fn new(name: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            name: name.into(),
            limit,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether another call fits in the window ending at `now`.
    pub fn allow(&self, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut timestamps = self.timestamps.lock();
        Self::prune(&mut timestamps, now, self.window);
        (timestamps.len() as u32) < self.limit
    }

    pub fn record(&self, now: Instant) {
        if self.limit == 0 {
            return;
        }
        let mut timestamps = self.timestamps.lock();
        Self::prune(&mut timestamps, now, self.window);
        timestamps.push_back(now);
    }

    /// Remaining headroom, or `None` when unlimited.
    pub fn remaining(&self, now: Instant) -> Option<u32> {
        if self.limit == 0 {
            return None;
        }
        let mut timestamps = self.timestamps.lock();
        Self::prune(&mut timestamps, now, self.window);
        Some(self.limit.saturating_sub(timestamps.len() as u32))
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
