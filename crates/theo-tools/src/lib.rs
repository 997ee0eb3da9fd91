// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod builtin;
mod governance;
mod registry;
mod tool;

pub use governance::{ActionPacket, DecisionStatus, GovernanceDecision, GovernanceLayer};
pub use registry::ToolRegistry;
pub use tool::{CostHint, Tool, ToolCall, ToolOutput, ToolSpec};
