// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_yaml::Value;
use tracing::debug;

use crate::Config;

/// Checked-in baseline, loaded first.
const DEFAULT_FILE: &str = "config/default.yaml";
/// Site-local changes; stacked over the baseline and rewritten by
/// [`save_override`].
const OVERRIDE_FILE: &str = "config/override.yaml";

struct Layer {
    name: &'static str,
    path: PathBuf,
    /// Missing optional layers are skipped; a missing required layer
    /// (the explicit `--config` path) is an error.
    required: bool,
}

fn layer_stack(extra: Option<&Path>) -> Vec<Layer> {
    let mut layers = vec![
        Layer {
            name: "default",
            path: PathBuf::from(DEFAULT_FILE),
            required: false,
        },
        Layer {
            name: "override",
            path: PathBuf::from(OVERRIDE_FILE),
            required: false,
        },
    ];
    if let Some(user_dir) = dirs::config_dir() {
        layers.push(Layer {
            name: "user",
            path: user_dir.join("theo/config.yaml"),
            required: false,
        });
    }
    if let Some(path) = extra {
        layers.push(Layer {
            name: "explicit",
            path: path.to_path_buf(),
            required: true,
        });
    }
    layers
}

/// Load configuration by stacking YAML layers: `config/default.yaml`, then
/// `config/override.yaml`, then the user file, then an explicit `--config`
/// path. Within a layer a mapping merges key-by-key; anything else (scalars,
/// sequences) is replaced wholesale by the later layer.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged: Option<Value> = None;

    for layer in layer_stack(extra) {
        if !layer.path.is_file() {
            if layer.required {
                anyhow::bail!("config file not found: {}", layer.path.display());
            }
            continue;
        }
        let text = std::fs::read_to_string(&layer.path)
            .with_context(|| format!("reading {}", layer.path.display()))?;
        let value: Value = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", layer.path.display()))?;
        debug!(layer = layer.name, path = %layer.path.display(), "applying config layer");
        merged = Some(match merged {
            None => value,
            Some(base) => overlay(base, value),
        });
    }

    match merged {
        None => Ok(Config::default()),
        Some(value) => {
            serde_yaml::from_value(value).context("configuration does not match the schema")
        }
    }
}

/// Stack `incoming` on top of `base`, consuming both. Mappings merge
/// recursively; every other node is replaced by the incoming value.
fn overlay(base: Value, incoming: Value) -> Value {
    match (base, incoming) {
        (Value::Mapping(mut base), Value::Mapping(incoming)) => {
            for (key, value) in incoming {
                let merged = match base.remove(&key) {
                    Some(existing) => overlay(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, incoming) => incoming,
    }
}

/// Persist the running configuration as the new `override.yaml`. A previous
/// override is never overwritten: it is rotated to the first free
/// `override_NNNN.yaml` slot first, so earlier site configurations can be
/// recovered. Returns the path written.
pub fn save_override(config_dir: &Path, config: &Config) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating {}", config_dir.display()))?;
    let override_path = config_dir.join("override.yaml");

    if override_path.exists() {
        let mut index = 1u32;
        let archive_path = loop {
            let candidate = config_dir.join(format!("override_{index:04}.yaml"));
            if !candidate.exists() {
                break candidate;
            }
            index += 1;
        };
        debug!(from = %override_path.display(), to = %archive_path.display(), "archiving previous override");
        std::fs::rename(&override_path, &archive_path)
            .with_context(|| format!("archiving {}", override_path.display()))?;
    }

    std::fs::write(&override_path, serde_yaml::to_string(config)?)
        .with_context(|| format!("writing {}", override_path.display()))?;
    Ok(override_path)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
