// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use theo_memory::ProfileManager;

use crate::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};

#[derive(Debug, Deserialize)]
struct UpdateProfileArgs {
    name: Option<String>,
    preferences: Option<HashMap<String, Value>>,
    favorites: Option<Vec<String>>,
}

/// `update_user_profile` — merge personal details into the active profile.
pub struct UpdateUserProfileTool {
    profiles: Arc<ProfileManager>,
}

impl UpdateUserProfileTool {
    pub fn new(profiles: Arc<ProfileManager>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl Tool for UpdateUserProfileTool {
    fn name(&self) -> &str {
        "update_user_profile"
    }

    fn description(&self) -> &str {
        "Update the active user profile with personal details like name, preferences, or \
         favorites."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "preferences": { "type": "object" },
                "favorites": { "type": "array", "items": { "type": "string" } },
            },
            "required": [],
        })
    }

    fn default_spec(&self) -> ToolSpec {
        ToolSpec {
            tier: 1,
            reversible: true,
            cost: CostHint::Cheap,
            safety_tags: vec!["personal_data".into()],
        }
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: UpdateProfileArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(err) => return ToolOutput::err(&call.id, format!("invalid arguments: {err}")),
        };
        match self
            .profiles
            .update_active_profile_fields(args.name, args.preferences, args.favorites)
        {
            Ok(profile) => ToolOutput::ok(
                &call.id,
                json!({
                    "user_id": profile.user_id,
                    "name": profile.name,
                    "preferences": profile.preferences,
                    "favorites": profile.favorites,
                    "last_seen": profile.last_seen,
                }),
            ),
            Err(err) => ToolOutput::err(&call.id, format!("profile update failed: {err}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
