// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

/// Realtime control core for the Theo companion robot.
#[derive(Debug, Parser)]
#[command(name = "theo", version, about)]
pub struct Cli {
    /// Initial text prompts sent before the microphone opens.
    /// Prompts that read as research requests route to the research
    /// subsystem instead of the conversation.
    #[arg(long, num_args = 1..)]
    pub prompts: Vec<String>,

    /// Explicit config file merged over the discovered layers
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
