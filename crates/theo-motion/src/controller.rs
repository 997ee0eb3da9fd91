// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use theo_config::MotionConfig;

use crate::{limit_step, scaled_pan_step, Action, Keyframe, Pose, ServoBackend, ServoSpec};

/// Monotonic milliseconds since process start, shared by all schedulers.
pub fn millis() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

struct Inner {
    backend: Arc<dyn ServoBackend>,
    config: MotionConfig,
    pan_spec: ServoSpec,
    tilt_spec: ServoSpec,
    queue: Mutex<BinaryHeap<Action>>,
    /// Set while any keyframe is executing (edge-triggered)
    moving: AtomicBool,
    position: Mutex<Pose>,
    velocity: Mutex<Pose>,
    stop: AtomicBool,
    jitter_ms: Mutex<VecDeque<u64>>,
}

/// Owns the servo rig and a min-heap of pending actions, advanced by a
/// dedicated tick thread. All servo writes happen on that thread.
pub struct MotionController {
    inner: Arc<Inner>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl MotionController {
    pub fn new(backend: Arc<dyn ServoBackend>, config: MotionConfig) -> Self {
        let pan_spec = ServoSpec::new(config.pan.min_angle, config.pan.max_angle);
        let tilt_spec = ServoSpec::new(config.tilt.min_angle, config.tilt.max_angle);
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                pan_spec,
                tilt_spec,
                queue: Mutex::new(BinaryHeap::new()),
                moving: AtomicBool::new(false),
                position: Mutex::new(Pose::default()),
                velocity: Mutex::new(Pose::default()),
                stop: AtomicBool::new(false),
                jitter_ms: Mutex::new(VecDeque::with_capacity(100)),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn pan_spec(&self) -> ServoSpec {
        self.inner.pan_spec
    }

    pub fn tilt_spec(&self) -> ServoSpec {
        self.inner.tilt_spec
    }

    pub fn position(&self) -> Pose {
        *self.inner.position.lock()
    }

    pub fn is_moving(&self) -> bool {
        self.inner.moving.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn add_action_to_queue(&self, action: Action) {
        self.inner.queue.lock().push(action);
    }

    pub fn is_control_loop_alive(&self) -> bool {
        self.thread.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Build a single-frame keyframe at the default transition time.
    pub fn generate_base_keyframe(&self, pan_degrees: f64, tilt_degrees: f64) -> Keyframe {
        Keyframe::new(
            "base",
            Pose::new(pan_degrees, tilt_degrees),
            self.inner.config.transition_time_ms,
        )
    }

    /// Spawn the tick thread: a home-pose sweep first, then the action loop.
    pub fn start_control_loop(&self) {
        let mut thread = self.thread.lock();
        if thread.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.inner.stop.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *thread = Some(
            std::thread::Builder::new()
                .name("motion-tick".into())
                .spawn(move || control_loop(inner))
                .expect("spawn motion tick thread"),
        );
    }

    /// Signal the tick thread to return to the sit pose, relax PWM, and exit.
    pub fn stop_control_loop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

fn control_loop(inner: Arc<Inner>) {
    // Home sweep: fold down, then look up to the ready pose.
    run_frame_to_completion(&inner, inner_frame(&inner, 0.0, -40.0, "home-down"));
    std::thread::sleep(Duration::from_secs(1));
    run_frame_to_completion(&inner, inner_frame(&inner, 0.0, 25.0, "home-up"));

    let period_ms = inner.config.tick_period_ms.max(1);
    let mut next_tick = millis();
    let mut current: Option<Action> = None;
    let mut tick_index: u64 = 0;

    while !inner.stop.load(Ordering::SeqCst) {
        let now = millis();
        if now >= next_tick {
            tick_index += 1;
            update_pose(&inner, &mut current, now);
            track_jitter(&inner, now.saturating_sub(next_tick));
            next_tick += period_ms;
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // Safe shutdown: sit, then cut PWM.
    run_frame_to_completion(&inner, inner_frame(&inner, 0.0, -40.0, "sit"));
    relax_all(&inner);
    info!(ticks = tick_index, "motion control loop stopped");
}

fn inner_frame(inner: &Inner, pan: f64, tilt: f64, name: &str) -> Keyframe {
    Keyframe::new(name, Pose::new(pan, tilt), inner.config.transition_time_ms)
}

fn run_frame_to_completion(inner: &Inner, mut frame: Keyframe) {
    while !move_to_keyframe(inner, &mut frame, millis()) {
        if inner.stop.load(Ordering::SeqCst) && frame.name != "sit" {
            return;
        }
        std::thread::sleep(Duration::from_millis(inner.config.tick_period_ms.max(1)));
    }
}

/// One scheduler step: pop a due action when idle, advance the current frame.
fn update_pose(inner: &Inner, current: &mut Option<Action>, now_ms: u64) {
    if current.is_none() {
        *current = next_action(inner, now_ms);
    }
    let Some(action) = current.as_mut() else { return };
    let Some(frame) = action.current_frame() else {
        *current = next_action(inner, now_ms);
        return;
    };
    if move_to_keyframe(inner, frame, now_ms) {
        if !action.advance() {
            *current = next_action(inner, now_ms);
        }
    }
}

fn next_action(inner: &Inner, now_ms: u64) -> Option<Action> {
    let mut queue = inner.queue.lock();
    let due = queue.peek().is_some_and(|a| a.timestamp_ms <= now_ms);
    if !due {
        return None;
    }
    let mut action = queue.pop()?;
    drop(queue);
    action.reset_frame_times();
    debug!(action = %action.name, "starting action");
    Some(action)
}

/// Drive one tick toward the frame target. Returns true when the frame is
/// finished (target reached and duration elapsed, or deadline fail-open).
fn move_to_keyframe(inner: &Inner, frame: &mut Keyframe, now_ms: u64) -> bool {
    inner.moving.store(true, Ordering::SeqCst);

    if !frame.is_initialized {
        let current = *inner.position.lock();
        frame.initialize(current, now_ms);
        info!(
            frame = %frame.name,
            duration_ms = frame.duration_ms,
            pan_from = current.pan,
            pan_to = frame.target.pan,
            tilt_from = current.tilt,
            tilt_to = frame.target.tilt,
            "new motion frame started"
        );
        if let Some(cue) = &frame.audio {
            debug!(frame = %frame.name, cue = %cue, "frame audio cue");
        }
    }

    // The reachable target: an out-of-range destination saturates at the
    // servo limit, and completion is judged against that.
    let target = Pose::new(
        inner.pan_spec.clamp(frame.target.pan),
        inner.tilt_spec.clamp(frame.target.tilt),
    );

    let dt_s = inner.config.tick_period_ms.max(1) as f64 / 1000.0;
    let position = *inner.position.lock();
    let pan_remaining = target.pan - position.pan;
    let pan_v_max =
        scaled_pan_step(pan_remaining, inner.config.pan_step_min, inner.config.pan_step_max) / dt_s;
    let tilt_v_max = inner.config.tilt_step_max / dt_s;

    let mut velocity = inner.velocity.lock();
    let limited_pan = limit_step(
        position.pan,
        target.pan,
        &mut velocity.pan,
        dt_s,
        pan_v_max,
        inner.config.pan_accel,
        inner.config.follower_eps,
    );
    let limited_tilt = limit_step(
        position.tilt,
        target.tilt,
        &mut velocity.tilt,
        dt_s,
        tilt_v_max,
        inner.config.tilt_accel,
        inner.config.follower_eps,
    );
    drop(velocity);

    let next = Pose::new(inner.pan_spec.clamp(limited_pan), inner.tilt_spec.clamp(limited_tilt));
    *inner.position.lock() = next;
    write_servos(inner, next);

    let eps = inner.config.done_eps;
    let at_dest = (next.pan - target.pan).abs() <= eps && (next.tilt - target.tilt).abs() <= eps;

    if frame_done(inner, frame, at_dest, now_ms) {
        // Snap to the exact target on completion.
        *inner.position.lock() = target;
        write_servos(inner, target);
        info!(
            frame = %frame.name,
            pan = target.pan,
            tilt = target.tilt,
            elapsed_ms = frame.elapsed_ms(now_ms),
            "motion frame completed"
        );
        inner.moving.store(false, Ordering::SeqCst);
        return true;
    }
    false
}

fn frame_done(inner: &Inner, frame: &Keyframe, at_dest: bool, now_ms: u64) -> bool {
    let Some(deadline) = frame.deadline_ms else {
        return at_dest;
    };
    let time_up = now_ms >= deadline;
    if at_dest {
        // Hold the pose for the full frame duration so sequences keep pace.
        return time_up;
    }
    if inner.config.fail_open_on_deadline && time_up {
        warn!(frame = %frame.name, "frame missed destination before deadline; advancing anyway");
        return true;
    }
    false
}

fn write_servos(inner: &Inner, pose: Pose) {
    if let Err(err) = inner.backend.write_angle("pan", pose.pan) {
        error!(%err, "pan servo write failed (retrying next tick)");
    }
    if let Err(err) = inner.backend.write_angle("tilt", pose.tilt) {
        error!(%err, "tilt servo write failed (retrying next tick)");
    }
}

fn relax_all(inner: &Inner) {
    for servo in ["pan", "tilt"] {
        if let Err(err) = inner.backend.relax(servo) {
            error!(%err, servo, "servo relax failed");
        }
    }
}

fn track_jitter(inner: &Inner, jitter: u64) {
    let mut jitter_ms = inner.jitter_ms.lock();
    if jitter_ms.len() >= 100 {
        jitter_ms.pop_front();
    }
    jitter_ms.push_back(jitter);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingBackend {
        writes: Mutex<Vec<(String, f64)>>,
        relaxed: Mutex<Vec<String>>,
    }

    impl ServoBackend for RecordingBackend {
        fn write_angle(&self, servo: &str, degrees: f64) -> anyhow::Result<()> {
            self.writes.lock().push((servo.to_string(), degrees));
            Ok(())
        }
        fn relax(&self, servo: &str) -> anyhow::Result<()> {
            self.relaxed.lock().push(servo.to_string());
            Ok(())
        }
    }

    struct FailingBackend;

    impl ServoBackend for FailingBackend {
        fn write_angle(&self, _servo: &str, _degrees: f64) -> anyhow::Result<()> {
            anyhow::bail!("i2c write failed")
        }
        fn relax(&self, _servo: &str) -> anyhow::Result<()> {
            anyhow::bail!("i2c write failed")
        }
    }

    fn controller_with(backend: Arc<dyn ServoBackend>) -> MotionController {
        MotionController::new(backend, MotionConfig::default())
    }

    fn run_frame(controller: &MotionController, mut frame: Keyframe, start_ms: u64) -> u64 {
        let period = controller.inner.config.tick_period_ms;
        let mut now = start_ms;
        for _ in 0..100_000 {
            if move_to_keyframe(&controller.inner, &mut frame, now) {
                return now;
            }
            now += period;
        }
        panic!("frame never completed");
    }

    #[test]
    fn frame_reaches_exact_target() {
        let backend = Arc::new(RecordingBackend::default());
        let controller = controller_with(backend.clone());
        let frame = controller.generate_base_keyframe(30.0, 10.0);
        run_frame(&controller, frame, 0);
        assert_eq!(controller.position(), Pose::new(30.0, 10.0));
        let writes = backend.writes.lock();
        assert_eq!(writes.last().unwrap(), &("tilt".to_string(), 10.0));
    }

    #[test]
    fn frame_holds_until_duration_elapses() {
        let controller = controller_with(Arc::new(RecordingBackend::default()));
        // Tiny move with a long duration: arrival is fast, completion is not.
        let frame = Keyframe::new("hold", Pose::new(0.5, 0.0), 1000);
        let done_at = run_frame(&controller, frame, 0);
        assert!(done_at >= 1000, "completed at {done_at}ms, before the deadline");
    }

    #[test]
    fn targets_are_clamped_to_servo_limits() {
        let controller = controller_with(Arc::new(RecordingBackend::default()));
        let frame = Keyframe::new("over", Pose::new(500.0, -500.0), 1500);
        run_frame(&controller, frame, 0);
        let pose = controller.position();
        assert_eq!(pose.pan, 90.0);
        assert_eq!(pose.tilt, -45.0);
    }

    #[test]
    fn moving_flag_tracks_frame_execution() {
        let controller = controller_with(Arc::new(RecordingBackend::default()));
        assert!(!controller.is_moving());
        let mut frame = controller.generate_base_keyframe(20.0, 0.0);
        move_to_keyframe(&controller.inner, &mut frame, 0);
        assert!(controller.is_moving());
        run_frame(&controller, frame, 20);
        assert!(!controller.is_moving());
    }

    #[test]
    fn backend_failure_does_not_abort_the_tick() {
        let controller = controller_with(Arc::new(FailingBackend));
        let frame = controller.generate_base_keyframe(10.0, 5.0);
        // Position tracking still converges even when every write fails.
        run_frame(&controller, frame, 0);
        assert_eq!(controller.position(), Pose::new(10.0, 5.0));
    }

    #[test]
    fn update_pose_pops_only_due_actions() {
        let controller = controller_with(Arc::new(RecordingBackend::default()));
        let frame = controller.generate_base_keyframe(10.0, 0.0);
        controller.add_action_to_queue(Action::new(1, 5_000, "later", vec![frame]));

        let mut current = None;
        update_pose(&controller.inner, &mut current, 0);
        assert!(current.is_none());
        update_pose(&controller.inner, &mut current, 5_000);
        assert!(current.is_some());
    }

    #[test]
    fn update_pose_advances_through_frames_and_actions() {
        let controller = controller_with(Arc::new(RecordingBackend::default()));
        let frames = vec![
            Keyframe::new("a", Pose::new(1.0, 0.0), 20),
            Keyframe::new("b", Pose::new(2.0, 0.0), 20),
        ];
        controller.add_action_to_queue(Action::new(2, 0, "two-step", frames));

        let mut current = None;
        let mut now = 0;
        for _ in 0..10_000 {
            update_pose(&controller.inner, &mut current, now);
            now += 20;
            if current.is_none() && controller.queue_len() == 0 && !controller.is_moving() {
                break;
            }
        }
        assert_eq!(controller.position(), Pose::new(2.0, 0.0));
    }

    #[test]
    fn higher_priority_action_runs_first() {
        let controller = controller_with(Arc::new(RecordingBackend::default()));
        controller.add_action_to_queue(Action::new(
            1,
            0,
            "low",
            vec![Keyframe::new("low", Pose::new(5.0, 0.0), 20)],
        ));
        controller.add_action_to_queue(Action::new(
            3,
            0,
            "high",
            vec![Keyframe::new("high", Pose::new(-5.0, 0.0), 20)],
        ));
        let mut current = None;
        update_pose(&controller.inner, &mut current, 0);
        assert_eq!(current.as_ref().unwrap().name, "high");
    }
}
