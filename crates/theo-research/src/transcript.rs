// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tracing::info;

use crate::{ResearchPacket, ResearchRequest};

/// Allocate the next run id from `var/current_run` (integer text) and bump it.
pub fn allocate_run_id(var_dir: &Path) -> anyhow::Result<u64> {
    std::fs::create_dir_all(var_dir)?;
    let path = var_dir.join("current_run");
    let current: u64 = std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(1);
    std::fs::write(&path, format!("{}\n", current + 1)).context("writing current_run")?;
    Ok(current)
}

/// Writes each research exchange as paired JSON + Markdown artifacts with
/// matching stems under the per-run log directory.
pub struct ResearchTranscript {
    run_dir: PathBuf,
    sequence: std::sync::atomic::AtomicU32,
}

impl ResearchTranscript {
    pub fn new(log_dir: &Path, run_id: u64) -> Self {
        Self {
            run_dir: log_dir.join(format!("run_{run_id}")),
            sequence: std::sync::atomic::AtomicU32::new(1),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Persist one exchange. Returns the shared stem of the pair.
    pub fn record(
        &self,
        request: &ResearchRequest,
        packet: &ResearchPacket,
    ) -> anyhow::Result<String> {
        std::fs::create_dir_all(&self.run_dir)?;
        let sequence = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let stem = format!(
            "research_{}_{:03}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            sequence
        );

        let json_path = self.run_dir.join(format!("{stem}.json"));
        let record = serde_json::json!({
            "request": request,
            "packet": packet,
        });
        std::fs::write(&json_path, serde_json::to_string_pretty(&record)?)?;

        let md_path = self.run_dir.join(format!("{stem}.md"));
        std::fs::write(&md_path, render_markdown(request, packet))?;

        info!(stem = %stem, dir = %self.run_dir.display(), "research transcript written");
        Ok(stem)
    }
}

fn render_markdown(request: &ResearchRequest, packet: &ResearchPacket) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Research: {}\n\n", request.prompt));
    out.push_str(&format!("- status: {}\n\n", packet.status));
    out.push_str("## Summary\n\n");
    out.push_str(&packet.answer_summary);
    out.push('\n');
    if !packet.extracted_facts.is_empty() {
        out.push_str("\n## Facts\n\n");
        for fact in &packet.extracted_facts {
            out.push_str(&format!("- {fact}\n"));
        }
    }
    if !packet.sources.is_empty() {
        out.push_str("\n## Sources\n\n");
        for source in &packet.sources {
            let title = source.get("title").map(String::as_str).unwrap_or("untitled");
            let url = source.get("url").map(String::as_str).unwrap_or("");
            out.push_str(&format!("- [{title}]({url})\n"));
        }
    }
    if !packet.safety_notes.is_empty() {
        out.push_str("\n## Notes\n\n");
        for note in &packet.safety_notes {
            out.push_str(&format!("- {note}\n"));
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_starts_at_one_and_increments() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(allocate_run_id(dir.path()).unwrap(), 1);
        assert_eq!(allocate_run_id(dir.path()).unwrap(), 2);
        assert_eq!(allocate_run_id(dir.path()).unwrap(), 3);
    }

    #[test]
    fn record_writes_paired_artifacts_with_matching_stems() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = ResearchTranscript::new(dir.path(), 7);
        let stem = transcript
            .record(
                &ResearchRequest::new("find datasheet"),
                &ResearchPacket::default(),
            )
            .unwrap();

        let run_dir = dir.path().join("run_7");
        assert!(run_dir.join(format!("{stem}.json")).is_file());
        assert!(run_dir.join(format!("{stem}.md")).is_file());

        let markdown = std::fs::read_to_string(run_dir.join(format!("{stem}.md"))).unwrap();
        assert!(markdown.contains("# Research: find datasheet"));
    }

    #[test]
    fn sequential_records_get_distinct_stems() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = ResearchTranscript::new(dir.path(), 1);
        let request = ResearchRequest::new("q");
        let packet = ResearchPacket::default();
        let a = transcript.record(&request, &packet).unwrap();
        let b = transcript.record(&request, &packet).unwrap();
        assert_ne!(a, b);
    }
}
