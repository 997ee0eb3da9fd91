// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::now_millis;

/// Persisted per-user personalization data.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    pub name: Option<String>,
    pub preferences: HashMap<String, Value>,
    pub favorites: Vec<String>,
    pub last_seen: Option<i64>,
}

impl UserProfile {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            preferences: HashMap::new(),
            favorites: Vec::new(),
            last_seen: None,
        }
    }
}

/// SQLite-backed storage for user profiles.
pub struct UserProfileStore {
    conn: Mutex<Connection>,
}

impl UserProfileStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> anyhow::Result<()> {
        self.conn.lock().execute(
            "CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                name TEXT,
                preferences JSON,
                favorites JSON,
                last_seen INTEGER
            )",
            [],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT user_id, name, preferences, favorites, last_seen
                 FROM user_profiles WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let preferences_json: Option<String> = row.get(2)?;
                    let favorites_json: Option<String> = row.get(3)?;
                    Ok(UserProfile {
                        user_id: row.get(0)?,
                        name: row.get(1)?,
                        preferences: preferences_json
                            .and_then(|p| serde_json::from_str(&p).ok())
                            .unwrap_or_default(),
                        favorites: favorites_json
                            .and_then(|f| serde_json::from_str(&f).ok())
                            .unwrap_or_default(),
                        last_seen: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_profile(&self, profile: &UserProfile) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_profiles (user_id, name, preferences, favorites, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 name = excluded.name,
                 preferences = excluded.preferences,
                 favorites = excluded.favorites,
                 last_seen = excluded.last_seen",
            params![
                profile.user_id,
                profile.name,
                serde_json::to_string(&profile.preferences)?,
                serde_json::to_string(&profile.favorites)?,
                profile.last_seen,
            ],
        )?;
        Ok(())
    }

    /// Stamp the profile's last-seen time, creating the row if needed.
    pub fn touch_last_seen(&self, user_id: &str) -> anyhow::Result<UserProfile> {
        let mut profile = self
            .get_profile(user_id)?
            .unwrap_or_else(|| UserProfile::empty(user_id));
        profile.last_seen = Some(now_millis());
        self.upsert_profile(&profile)?;
        Ok(profile)
    }

    /// Merge non-`None` fields into the stored profile.
    pub fn update_profile_fields(
        &self,
        user_id: &str,
        name: Option<String>,
        preferences: Option<HashMap<String, Value>>,
        favorites: Option<Vec<String>>,
    ) -> anyhow::Result<UserProfile> {
        let mut profile = self
            .get_profile(user_id)?
            .unwrap_or_else(|| UserProfile::empty(user_id));
        if let Some(name) = name {
            profile.name = Some(name);
        }
        if let Some(preferences) = preferences {
            profile.preferences.extend(preferences);
        }
        if let Some(favorites) = favorites {
            profile.favorites = favorites;
        }
        profile.last_seen = Some(now_millis());
        self.upsert_profile(&profile)?;
        Ok(profile)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
