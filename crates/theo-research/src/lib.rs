// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod firecrawl;
mod intent;
mod models;
mod provider;
mod transcript;

pub use firecrawl::{FirecrawlClient, FirecrawlProvider};
pub use intent::has_research_intent;
pub use models::{ResearchPacket, ResearchRequest, RESEARCH_PACKET_SCHEMA};
pub use provider::{NullProvider, ResearchProvider};
pub use transcript::{allocate_run_id, ResearchTranscript};
