// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::now_millis;

/// One persisted reflection row: a session summary plus extracted lessons.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionEntry {
    pub reflection_id: i64,
    pub timestamp: i64,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub summary: String,
    pub lessons: Vec<String>,
}

/// SQLite-backed storage for reflection entries.
pub struct ReflectionStore {
    conn: Mutex<Connection>,
}

impl ReflectionStore {
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
            "CREATE TABLE IF NOT EXISTS reflections (
                reflection_id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER,
                user_id TEXT,
                session_id TEXT,
                summary TEXT,
                lessons JSON
            )",
            [],
        )?;
        Ok(())
    }

    pub fn append_reflection(
        &self,
        summary: &str,
        lessons: &[String],
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> anyhow::Result<ReflectionEntry> {
        let timestamp = now_millis();
        let lessons_json = serde_json::to_string(lessons)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reflections (timestamp, user_id, session_id, summary, lessons)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![timestamp, user_id, session_id, summary, lessons_json],
        )?;
        Ok(ReflectionEntry {
            reflection_id: conn.last_insert_rowid(),
            timestamp,
            user_id: user_id.map(String::from),
            session_id: session_id.map(String::from),
            summary: summary.to_string(),
            lessons: lessons.to_vec(),
        })
    }

    /// Most recent lessons for a user, newest first, flattened.
    pub fn recent_lessons(&self, limit: usize, user_id: Option<&str>) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut sql =
            String::from("SELECT lessons FROM reflections WHERE 1 = 1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(user_id) = user_id {
            sql.push_str(" AND user_id = ?");
            params_vec.push(Box::new(user_id.to_string()));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        params_vec.push(Box::new(limit as i64));

        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            |row| row.get::<_, Option<String>>(0),
        )?;

        let mut lessons = Vec::new();
        for row in rows.flatten() {
            if let Some(json) = row {
                if let Ok(parsed) = serde_json::from_str::<Vec<String>>(&json) {
                    lessons.extend(parsed);
                }
            }
            if lessons.len() >= limit {
                lessons.truncate(limit);
                break;
            }
        }
        Ok(lessons)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
