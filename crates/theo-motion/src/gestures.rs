// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{millis, Action, Keyframe, MotionController, Pose};

#[derive(Debug, thiserror::Error)]
pub enum GestureError {
    #[error("unknown gesture: {0}")]
    Unknown(String),
}

/// Definition for a single gesture keyframe offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureFrameSpec {
    pub name: String,
    pub pan_offset: f64,
    pub tilt_offset: f64,
    pub duration_ms: u32,
}

impl GestureFrameSpec {
    fn new(name: &str, pan_offset: f64, tilt_offset: f64, duration_ms: u32) -> Self {
        Self {
            name: name.into(),
            pan_offset,
            tilt_offset,
            duration_ms,
        }
    }
}

/// Named keyframe sequence with a scheduling priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureDefinition {
    pub name: String,
    pub priority: i32,
    pub frames: Vec<GestureFrameSpec>,
}

/// On-disk document wrapping the full library.
#[derive(Debug, Serialize, Deserialize)]
struct GestureDocument {
    gestures: Vec<GestureDefinition>,
}

/// The nine stock gestures. Offsets of ±999 saturate against the servo
/// limits, turning into "as far as it goes" moves.
pub fn default_gestures() -> Vec<GestureDefinition> {
    vec![
        GestureDefinition {
            name: "gesture_idle".into(),
            priority: 1,
            frames: vec![
                GestureFrameSpec::new("idle-left", -4.0, 2.5, 1200),
                GestureFrameSpec::new("idle-right", 4.0, -2.5, 1200),
                GestureFrameSpec::new("idle-center", 0.0, 0.0, 1000),
            ],
        },
        GestureDefinition {
            name: "gesture_nod".into(),
            priority: 2,
            frames: vec![
                GestureFrameSpec::new("nod-down", 0.0, -10.0, 350),
                GestureFrameSpec::new("nod-up", 0.0, 10.0, 350),
                GestureFrameSpec::new("nod-center", 0.0, 0.0, 400),
            ],
        },
        GestureDefinition {
            name: "gesture_no".into(),
            priority: 2,
            frames: vec![
                GestureFrameSpec::new("no-left", -12.0, 0.0, 300),
                GestureFrameSpec::new("no-right", 12.0, 0.0, 300),
                GestureFrameSpec::new("no-left-return", -8.0, 0.0, 250),
                GestureFrameSpec::new("no-center", 0.0, 0.0, 350),
            ],
        },
        GestureDefinition {
            name: "gesture_look_around".into(),
            priority: 1,
            frames: vec![
                GestureFrameSpec::new("look-left", -16.0, 3.0, 700),
                GestureFrameSpec::new("look-right", 16.0, 3.0, 800),
                GestureFrameSpec::new("look-center", 0.0, 0.0, 700),
            ],
        },
        GestureDefinition {
            name: "gesture_look_up".into(),
            priority: 2,
            frames: vec![GestureFrameSpec::new("look-up", 0.0, 999.0, 600)],
        },
        GestureDefinition {
            name: "gesture_look_left".into(),
            priority: 2,
            frames: vec![GestureFrameSpec::new("look-left", -999.0, 0.0, 600)],
        },
        GestureDefinition {
            name: "gesture_look_right".into(),
            priority: 2,
            frames: vec![GestureFrameSpec::new("look-right", 999.0, 0.0, 600)],
        },
        GestureDefinition {
            name: "gesture_look_down".into(),
            priority: 2,
            frames: vec![GestureFrameSpec::new("look-down", 0.0, -999.0, 600)],
        },
        GestureDefinition {
            name: "gesture_curious_tilt".into(),
            priority: 1,
            frames: vec![
                GestureFrameSpec::new("tilt-up", 0.0, 8.0, 500),
                GestureFrameSpec::new("tilt-down", 0.0, -8.0, 500),
                GestureFrameSpec::new("tilt-center", 0.0, 0.0, 450),
            ],
        },
        GestureDefinition {
            name: "gesture_attention_snap".into(),
            priority: 2,
            frames: vec![
                GestureFrameSpec::new("snap-right", 10.0, 2.0, 250),
                GestureFrameSpec::new("snap-hold", 10.0, 2.0, 300),
                GestureFrameSpec::new("snap-center", 0.0, 0.0, 400),
            ],
        },
    ]
}

/// Persistent table of gesture definitions, keyed by name.
///
/// The library is one JSON document on disk, reloaded on startup; missing
/// stock gestures are re-seeded and persisted.
pub struct GestureLibrary {
    path: PathBuf,
    definitions: Mutex<HashMap<String, GestureDefinition>>,
}

impl GestureLibrary {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let library = Self {
            path,
            definitions: Mutex::new(HashMap::new()),
        };
        library.load();
        library.ensure_defaults();
        library
    }

    pub fn list_gestures(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Result<GestureDefinition, GestureError> {
        self.definitions
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| GestureError::Unknown(name.to_string()))
    }

    pub fn register(&self, definition: GestureDefinition, persist: bool) {
        self.definitions
            .lock()
            .insert(definition.name.clone(), definition);
        if persist {
            self.persist();
        }
    }

    /// Seed any missing stock gestures, persisting if the set changed.
    pub fn ensure_defaults(&self) {
        let mut added = false;
        {
            let mut definitions = self.definitions.lock();
            for definition in default_gestures() {
                if !definitions.contains_key(&definition.name) {
                    definitions.insert(definition.name.clone(), definition);
                    added = true;
                }
            }
        }
        if added {
            self.persist();
        }
    }

    /// Build a scheduled action from a definition: offsets scale with
    /// intensity, targets clamp against the servo limits, and the action
    /// starts `delay_ms` from now.
    pub fn build_action(
        &self,
        controller: &MotionController,
        name: &str,
        delay_ms: u64,
        intensity: f64,
    ) -> Result<Action, GestureError> {
        let definition = self.get(name)?;
        let base = controller.position();
        let pan_spec = controller.pan_spec();
        let tilt_spec = controller.tilt_spec();

        let frames = definition
            .frames
            .iter()
            .map(|spec| {
                let target = Pose::new(
                    pan_spec.clamp(base.pan + spec.pan_offset * intensity),
                    tilt_spec.clamp(base.tilt + spec.tilt_offset * intensity),
                );
                Keyframe::new(spec.name.clone(), target, spec.duration_ms)
            })
            .collect();

        Ok(Action::new(
            definition.priority,
            millis() + delay_ms,
            definition.name,
            frames,
        ))
    }

    fn load(&self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str::<GestureDocument>(&text).map_err(Into::into))
        {
            Ok(document) => {
                let mut definitions = self.definitions.lock();
                for definition in document.gestures {
                    definitions.insert(definition.name.clone(), definition);
                }
            }
            Err(err) => warn!(%err, path = %self.path.display(), "failed to load gesture library"),
        }
    }

    fn persist(&self) {
        let document = {
            let definitions = self.definitions.lock();
            let mut gestures: Vec<GestureDefinition> = definitions.values().cloned().collect();
            gestures.sort_by(|a, b| a.name.cmp(&b.name));
            GestureDocument { gestures }
        };
        if let Err(err) = write_document(&self.path, &document) {
            warn!(%err, path = %self.path.display(), "failed to persist gesture library");
        }
    }
}

fn write_document(path: &Path, document: &GestureDocument) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(document)?)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
