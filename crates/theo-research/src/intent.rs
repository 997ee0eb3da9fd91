// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::OnceLock;

use regex::Regex;

const INTENT_PHRASES: &[&str] = &[
    "look up",
    "search the web",
    "search online",
    "search for",
    "find spec",
    "find specs",
    "find pinout",
    "find data sheet",
    "find datasheet",
    "check the datasheet",
    "read the datasheet",
    "what does the datasheet say",
];

fn intent_regexes() -> &'static [Regex] {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        vec![
            Regex::new(
                r"\b(can you|please|could you)?\s*(search|look up|look for|find)\b.*\b(online|web|internet)\b",
            )
            .expect("valid research intent regex"),
            Regex::new(r"\b(datasheet|data\s*sheet|specs?|pinout|manual)\b")
                .expect("valid research intent regex"),
        ]
    })
}

/// True when the text appears to request a web-style lookup.
pub fn has_research_intent(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    if INTENT_PHRASES.iter().any(|phrase| normalized.contains(phrase)) {
        return true;
    }
    intent_regexes().iter().any(|regex| regex.is_match(&normalized))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
