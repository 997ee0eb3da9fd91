// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Acceleration-limited velocity follower for one axis.
///
/// Given the current position, the target, and the axis velocity state,
/// returns the next position such that `|result − current| ≤ v_max·dt` and
/// `|Δv| ≤ a_max·dt`. Inside `eps` of the target the position snaps and the
/// velocity clears; a step that would cross the target also snaps, so the
/// error sign can never flip.
pub fn limit_step(
    current: f64,
    target: f64,
    velocity: &mut f64,
    dt_s: f64,
    v_max: f64,
    a_max: f64,
    eps: f64,
) -> f64 {
    let err = target - current;
    if err.abs() <= eps {
        *velocity = 0.0;
        return target;
    }

    let v_des = (err / dt_s.max(1e-6)).clamp(-v_max, v_max);

    let dv_max = a_max * dt_s;
    let dv = (v_des - *velocity).clamp(-dv_max, dv_max);
    let v = (*velocity + dv).clamp(-v_max, v_max);

    let next = current + v * dt_s;

    // Overshoot: old and new error disagree in sign.
    if (target - current) * (target - next) <= 0.0 {
        *velocity = 0.0;
        return target;
    }

    *velocity = v;
    next
}

/// Pan step ceiling in degrees per tick, scaled with remaining distance.
/// Small corrections crawl; quarter-turn sweeps move at the full ceiling.
pub fn scaled_pan_step(dist_deg: f64, step_min: f64, step_max: f64) -> f64 {
    let ratio = clamp01(dist_deg.abs() / 90.0);
    step_min + (step_max - step_min) * ratio
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
