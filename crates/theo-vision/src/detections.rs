// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde_json::Value;

/// One object detection from the on-camera accelerator.
#[derive(Debug, Clone)]
pub struct Detection {
    pub label: String,
    /// Confidence in [0,1]
    pub confidence: f64,
    /// (x, y, w, h) normalized to [0,1]
    pub bbox: (f64, f64, f64, f64),
    pub metadata: HashMap<String, Value>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f64, bbox: (f64, f64, f64, f64)) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
            metadata: HashMap::new(),
        }
    }
}

/// A detection snapshot for one frame.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub timestamp_ms: u64,
    pub frame_id: Option<u64>,
    pub detections: Vec<Detection>,
}

impl DetectionEvent {
    pub fn new(timestamp_ms: u64, detections: Vec<Detection>) -> Self {
        Self {
            timestamp_ms,
            frame_id: None,
            detections,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
