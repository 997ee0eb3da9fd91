// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::{MemoryEntry, MemoryStore, ReflectionStore, UserProfile, UserProfileStore};

const MAX_CONTENT_LENGTH: usize = 400;
const MAX_TAGS: usize = 6;
const MAX_TAG_LENGTH: usize = 24;
const MAX_RECALL_LIMIT: usize = 10;
const MIN_IMPORTANCE: u8 = 1;
const MAX_IMPORTANCE: u8 = 5;

fn normalize_content(content: &str) -> String {
    let trimmed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.chars().count() <= MAX_CONTENT_LENGTH {
        return trimmed;
    }
    let mut clipped: String = trimmed.chars().take(MAX_CONTENT_LENGTH - 1).collect();
    clipped.push('…');
    clipped
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut normalized = Vec::new();
    for raw in tags {
        let tag: String = raw.trim().to_lowercase().chars().take(MAX_TAG_LENGTH).collect();
        if tag.is_empty() || !seen.insert(tag.clone()) {
            continue;
        }
        normalized.push(tag);
        if normalized.len() >= MAX_TAGS {
            break;
        }
    }
    normalized
}

/// Summarized memory entry suitable for prompts and tool results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemorySummary {
    pub memory_id: i64,
    pub content: String,
    pub tags: Vec<String>,
    pub importance: u8,
}

impl From<MemoryEntry> for MemorySummary {
    fn from(entry: MemoryEntry) -> Self {
        Self {
            memory_id: entry.memory_id,
            content: entry.content,
            tags: entry.tags,
            importance: entry.importance,
        }
    }
}

/// Normalizing front for the memory store, scoped to the active user.
pub struct MemoryManager {
    store: Arc<MemoryStore>,
    active_user_id: String,
    active_session_id: Option<String>,
}

impl MemoryManager {
    pub fn new(store: Arc<MemoryStore>, active_user_id: impl Into<String>) -> Self {
        Self {
            store,
            active_user_id: active_user_id.into(),
            active_session_id: None,
        }
    }

    pub fn set_active_session_id(&mut self, session_id: Option<String>) {
        self.active_session_id = session_id;
    }

    pub fn remember(
        &self,
        content: &str,
        tags: &[String],
        importance: u8,
    ) -> anyhow::Result<MemoryEntry> {
        self.store.append_memory(
            &normalize_content(content),
            &normalize_tags(tags),
            importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE),
            Some(&self.active_user_id),
            self.active_session_id.as_deref(),
        )
    }

    pub fn recall(&self, query: Option<&str>, limit: usize) -> anyhow::Result<Vec<MemorySummary>> {
        let entries = self.store.search_memories(
            query,
            limit.clamp(1, MAX_RECALL_LIMIT),
            Some(&self.active_user_id),
            None,
        )?;
        Ok(entries.into_iter().map(MemorySummary::from).collect())
    }

    pub fn forget(&self, memory_id: i64) -> anyhow::Result<bool> {
        self.store.delete_memory(memory_id)
    }
}

/// Snapshot of the active profile for session personalization.
#[derive(Debug, Clone)]
pub struct ProfileContext {
    pub profile: UserProfile,
}

impl ProfileContext {
    pub fn to_instruction_block(&self) -> String {
        let preferences = if self.profile.preferences.is_empty() {
            "None".to_string()
        } else {
            serde_json::to_string_pretty(&sorted(&self.profile.preferences)).unwrap_or_default()
        };
        let favorites = if self.profile.favorites.is_empty() {
            "None".to_string()
        } else {
            self.profile.favorites.join(", ")
        };
        let last_seen = self
            .profile
            .last_seen
            .map(|v| v.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let name = self.profile.name.as_deref().unwrap_or("Unknown");
        format!(
            "User profile context:\n- id: {}\n- name: {}\n- preferences: {}\n- favorites: {}\n- last_seen: {}\nUse this info to personalize responses. If data is missing, ask politely.\n",
            self.profile.user_id, name, preferences, favorites, last_seen
        )
    }
}

fn sorted(map: &HashMap<String, Value>) -> std::collections::BTreeMap<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Front for the profile store, scoped to the active user.
pub struct ProfileManager {
    store: Arc<UserProfileStore>,
    active_user_id: String,
}

impl ProfileManager {
    pub fn new(store: Arc<UserProfileStore>, active_user_id: impl Into<String>) -> Self {
        Self {
            store,
            active_user_id: active_user_id.into(),
        }
    }

    pub fn active_user_id(&self) -> &str {
        &self.active_user_id
    }

    pub fn load_active_profile(&self) -> anyhow::Result<UserProfile> {
        self.store.touch_last_seen(&self.active_user_id)
    }

    pub fn update_active_profile_fields(
        &self,
        name: Option<String>,
        preferences: Option<HashMap<String, Value>>,
        favorites: Option<Vec<String>>,
    ) -> anyhow::Result<UserProfile> {
        self.store
            .update_profile_fields(&self.active_user_id, name, preferences, favorites)
    }

    pub fn profile_context(&self) -> anyhow::Result<ProfileContext> {
        Ok(ProfileContext {
            profile: self.load_active_profile()?,
        })
    }
}

/// Snapshot of recent reflection lessons for session instructions.
#[derive(Debug, Clone)]
pub struct ReflectionContext {
    pub user_id: String,
    pub recent_lessons: Vec<String>,
}

impl ReflectionContext {
    pub fn to_instruction_block(&self) -> String {
        let lessons = if self.recent_lessons.is_empty() {
            "None".to_string()
        } else {
            self.recent_lessons
                .iter()
                .map(|l| format!("- {l}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "Reflection context:\n- user_id: {}\n- recent_lessons:\n{}\nUse these lessons to improve guidance and avoid repeat mistakes.",
            self.user_id, lessons
        )
    }
}

/// Front for the reflection store, scoped to the active user.
pub struct ReflectionManager {
    store: Arc<ReflectionStore>,
    active_user_id: String,
}

impl ReflectionManager {
    pub fn new(store: Arc<ReflectionStore>, active_user_id: impl Into<String>) -> Self {
        Self {
            store,
            active_user_id: active_user_id.into(),
        }
    }

    pub fn append_reflection(&self, summary: &str, lessons: &[String]) -> anyhow::Result<()> {
        self.store
            .append_reflection(summary, lessons, Some(&self.active_user_id), None)?;
        Ok(())
    }

    pub fn reflection_context(&self, limit: usize) -> anyhow::Result<ReflectionContext> {
        Ok(ReflectionContext {
            user_id: self.active_user_id.clone(),
            recent_lessons: self.store.recent_lessons(limit, Some(&self.active_user_id))?,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
