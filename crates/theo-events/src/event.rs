// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stimulus priority. Ordering is strict across levels; FIFO within a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Numeric rank used by the bus pop order (higher pops first).
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Structured event payload for realtime injections.
///
/// Immutable once published; expiration is `now − created_at > ttl`.
#[derive(Debug, Clone)]
pub struct Event {
    pub source: String,
    pub kind: String,
    pub priority: Priority,
    pub content: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub dedupe_key: Option<String>,
    pub ttl: Option<Duration>,
    pub cooldown: Option<Duration>,
    pub request_response: Option<bool>,
    pub created_at: Instant,
}

impl Event {
    pub fn new(source: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: kind.into(),
            priority: Priority::Normal,
            content: None,
            metadata: HashMap::new(),
            dedupe_key: None,
            ttl: None,
            cooldown: None,
            request_response: None,
            created_at: Instant::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_request_response(mut self, request_response: bool) -> Self {
        self.request_response = Some(request_response);
        self
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(self.created_at) > ttl,
            None => false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ranks_are_strictly_ordered() {
        assert!(Priority::Critical.rank() > Priority::High.rank());
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
    }

    #[test]
    fn event_without_ttl_never_expires() {
        let event = Event::new("system", "message");
        assert!(!event.is_expired(event.created_at + Duration::from_secs(3600)));
    }

    #[test]
    fn event_expires_strictly_after_ttl() {
        let event = Event::new("camera", "image").with_ttl(Duration::from_secs(5));
        assert!(!event.is_expired(event.created_at + Duration::from_secs(5)));
        assert!(event.is_expired(event.created_at + Duration::from_millis(5001)));
    }

    #[test]
    fn builder_sets_all_fields() {
        let event = Event::new("battery", "status")
            .with_priority(Priority::High)
            .with_content("low battery")
            .with_dedupe_key("battery_status")
            .with_cooldown(Duration::from_secs(60))
            .with_request_response(true)
            .with_metadata_entry("voltage", serde_json::json!(7.2));
        assert_eq!(event.priority, Priority::High);
        assert_eq!(event.dedupe_key.as_deref(), Some("battery_status"));
        assert_eq!(event.request_response, Some(true));
        assert_eq!(event.metadata["voltage"], serde_json::json!(7.2));
    }
}
