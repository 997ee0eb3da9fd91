// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::now_millis;

/// One persisted memory row.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub memory_id: i64,
    pub timestamp: i64,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub importance: u8,
}

/// SQLite-backed storage for memory entries. Single writer connection
/// behind a lock.
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
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
            "CREATE TABLE IF NOT EXISTS memories (
                memory_id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER,
                user_id TEXT,
                session_id TEXT,
                content TEXT,
                tags JSON,
                importance INTEGER
            )",
            [],
        )?;
        Ok(())
    }

    pub fn append_memory(
        &self,
        content: &str,
        tags: &[String],
        importance: u8,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> anyhow::Result<MemoryEntry> {
        let timestamp = now_millis();
        let tags_json = serde_json::to_string(tags)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memories (timestamp, user_id, session_id, content, tags, importance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![timestamp, user_id, session_id, content, tags_json, importance],
        )?;
        let memory_id = conn.last_insert_rowid();
        Ok(MemoryEntry {
            memory_id,
            timestamp,
            user_id: user_id.map(String::from),
            session_id: session_id.map(String::from),
            content: content.to_string(),
            tags: tags.to_vec(),
            importance,
        })
    }

    /// LIKE search over content and tags, ordered by importance then recency.
    pub fn search_memories(
        &self,
        query: Option<&str>,
        limit: usize,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let mut sql = String::from(
            "SELECT memory_id, timestamp, user_id, session_id, content, tags, importance
             FROM memories WHERE 1 = 1",
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(user_id) = user_id {
            sql.push_str(" AND user_id = ?");
            params_vec.push(Box::new(user_id.to_string()));
        }
        if let Some(session_id) = session_id {
            sql.push_str(" AND session_id = ?");
            params_vec.push(Box::new(session_id.to_string()));
        }
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            sql.push_str(" AND (content LIKE ? OR tags LIKE ?)");
            let like_term = format!("%{query}%");
            params_vec.push(Box::new(like_term.clone()));
            params_vec.push(Box::new(like_term));
        }
        sql.push_str(" ORDER BY importance DESC, timestamp DESC LIMIT ?");
        params_vec.push(Box::new(limit as i64));

        let conn = self.conn.lock();
        let mut statement = conn.prepare(&sql)?;
        let rows = statement.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            |row| {
                let tags_json: Option<String> = row.get(5)?;
                Ok(MemoryEntry {
                    memory_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    user_id: row.get(2)?,
                    session_id: row.get(3)?,
                    content: row.get(4)?,
                    tags: tags_json
                        .and_then(|t| serde_json::from_str(&t).ok())
                        .unwrap_or_default(),
                    importance: row.get(6)?,
                })
            },
        )?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    /// Returns true when a row was actually removed.
    pub fn delete_memory(&self, memory_id: i64) -> anyhow::Result<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute("DELETE FROM memories WHERE memory_id = ?1", params![memory_id])?;
        Ok(affected > 0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
