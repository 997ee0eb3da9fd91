// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use anyhow::Context;
use serde_json::json;

/// Minimal Firecrawl wrapper for datasheet markdown ingestion.
///
/// Enabled only when `FIRECRAWL_API_KEY` is set (or a key is injected).
pub struct FirecrawlClient {
    api_key: String,
    api_url: String,
    client: reqwest::Client,
}

impl FirecrawlClient {
    pub fn new(api_key: Option<String>, api_url: impl Into<String>, timeout_s: f64) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("FIRECRAWL_API_KEY").ok())
            .unwrap_or_default()
            .trim()
            .to_string();
        Self {
            api_key,
            api_url: api_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs_f64(timeout_s.max(5.0)))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Fetch a page as markdown, truncated to `max_markdown_chars`.
    pub async fn fetch_markdown(
        &self,
        url: &str,
        max_pages: u32,
        max_markdown_chars: usize,
    ) -> anyhow::Result<String> {
        anyhow::ensure!(self.enabled(), "firecrawl disabled: no api key");
        let payload = json!({
            "url": url,
            "formats": ["markdown"],
            "maxAge": 0,
            "maxPages": max_pages.max(1),
        });
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("firecrawl request failed")?
            .error_for_status()
            .context("firecrawl returned an error status")?;
        let body: serde_json::Value = response.json().await.context("firecrawl body was not json")?;
        let markdown = body
            .pointer("/data/markdown")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if markdown.chars().count() > max_markdown_chars {
            let mut clipped: String = markdown.chars().take(max_markdown_chars).collect();
            clipped.push('…');
            return Ok(clipped);
        }
        Ok(markdown)
    }
}

/// Research provider that extracts markdown for URL-bearing prompts.
///
/// Non-URL prompts return a packet explaining that only document extraction
/// is available; richer synthesis providers plug in behind the same trait.
pub struct FirecrawlProvider {
    client: FirecrawlClient,
    max_markdown_chars: usize,
}

impl FirecrawlProvider {
    pub fn new(client: FirecrawlClient, max_markdown_chars: usize) -> Self {
        Self {
            client,
            max_markdown_chars,
        }
    }
}

#[async_trait::async_trait]
impl crate::ResearchProvider for FirecrawlProvider {
    async fn request_research(&self, request: &crate::ResearchRequest) -> crate::ResearchPacket {
        let Some(url) = request
            .prompt
            .split_whitespace()
            .find(|word| word.starts_with("http://") || word.starts_with("https://"))
        else {
            let mut packet = crate::ResearchPacket::default();
            packet.status = "no_url".into();
            packet.answer_summary =
                "No URL found in the request; document extraction needs a link.".into();
            return packet;
        };
        match self
            .client
            .fetch_markdown(url, 1, self.max_markdown_chars)
            .await
        {
            Ok(markdown) if !markdown.is_empty() => {
                let mut packet = crate::ResearchPacket::default();
                packet.status = "ok".into();
                packet.answer_summary = markdown;
                packet.sources = vec![[
                    ("title".to_string(), url.to_string()),
                    ("url".to_string(), url.to_string()),
                ]
                .into_iter()
                .collect()];
                packet
            }
            Ok(_) => crate::ResearchPacket::error("empty_document"),
            Err(err) => crate::ResearchPacket::error(err.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
