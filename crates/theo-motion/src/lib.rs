// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod action;
mod controller;
mod follower;
mod gestures;
mod keyframe;
mod servo;

pub use action::Action;
pub use controller::{millis, MotionController};
pub use follower::{clamp01, limit_step, scaled_pan_step};
pub use gestures::{default_gestures, GestureDefinition, GestureError, GestureFrameSpec, GestureLibrary};
pub use keyframe::{Keyframe, Pose};
pub use servo::{ServoBackend, ServoSpec};
