// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::{ResearchPacket, ResearchRequest};

/// Interface for research subsystem providers.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn request_research(&self, request: &ResearchRequest) -> ResearchPacket;
}

/// Safe default implementation that performs no network activity.
pub struct NullProvider;

#[async_trait]
impl ResearchProvider for NullProvider {
    async fn request_research(&self, request: &ResearchRequest) -> ResearchPacket {
        let mut packet = ResearchPacket::default();
        packet.safety_notes.push("research_disabled".into());
        packet.metadata.insert("reason".into(), json!("research_disabled"));
        packet
            .metadata
            .insert("prompt_length".into(), json!(request.prompt.len()));
        info!(status = %packet.status, "returning null research packet");
        packet
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
