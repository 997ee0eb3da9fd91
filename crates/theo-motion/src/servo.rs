// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Angle limits for one named servo.
#[derive(Debug, Clone, Copy)]
pub struct ServoSpec {
    pub min_angle: f64,
    pub max_angle: f64,
}

impl ServoSpec {
    pub fn new(min_angle: f64, max_angle: f64) -> Self {
        Self { min_angle, max_angle }
    }

    pub fn clamp(&self, degrees: f64) -> f64 {
        degrees.clamp(self.min_angle, self.max_angle)
    }
}

/// Writes to the PWM servo rig. The I²C driver behind this is an external
/// collaborator; the motion tick thread is the only caller.
pub trait ServoBackend: Send + Sync {
    fn write_angle(&self, servo: &str, degrees: f64) -> anyhow::Result<()>;
    /// Cut PWM so the servo goes limp.
    fn relax(&self, servo: &str) -> anyhow::Result<()>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
