// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod manager;
mod memories;
mod profiles;
mod reflections;

pub use manager::{MemoryManager, MemorySummary, ProfileContext, ProfileManager, ReflectionContext, ReflectionManager};
pub use memories::{MemoryEntry, MemoryStore};
pub use profiles::{UserProfile, UserProfileStore};
pub use reflections::{ReflectionEntry, ReflectionStore};

/// Wall-clock milliseconds for persisted timestamps.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
