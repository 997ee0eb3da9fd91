// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use theo_config::{AutonomyLevel, GovernanceConfig};
use theo_events::RollingWindow;

use crate::{CostHint, ToolSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionStatus {
    Approved,
    NeedsConfirmation,
    Denied,
}

#[derive(Debug, Clone)]
pub struct GovernanceDecision {
    pub status: DecisionStatus,
    pub reason: String,
}

impl GovernanceDecision {
    fn new(status: DecisionStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub fn approved(&self) -> bool {
        self.status == DecisionStatus::Approved
    }

    pub fn needs_confirmation(&self) -> bool {
        self.status == DecisionStatus::NeedsConfirmation
    }

    pub fn denied(&self) -> bool {
        self.status == DecisionStatus::Denied
    }
}

/// A requested tool call as governance sees it.
#[derive(Debug, Clone)]
pub struct ActionPacket {
    pub name: String,
    pub call_id: String,
    pub args: Value,
    pub spec: ToolSpec,
    pub estimated_cost: CostHint,
    pub risk_score: f64,
    pub created_at: Instant,
}

impl ActionPacket {
    pub fn summary(&self) -> String {
        format!(
            "tool={} tier={} cost={} risk={:.2} reversible={}",
            self.name,
            self.spec.tier,
            self.estimated_cost.as_str(),
            self.risk_score,
            self.spec.reversible
        )
    }
}

/// Tool-call admission control: autonomy dial, risk scoring, and rolling
/// budgets.
pub struct GovernanceLayer {
    specs: HashMap<String, ToolSpec>,
    autonomy: AutonomyLevel,
    risk_threshold: f64,
    tool_calls_budget: RollingWindow,
    expensive_budget: RollingWindow,
}

impl GovernanceLayer {
    /// `default_specs` come from the registry; config entries override them.
    pub fn new(config: &GovernanceConfig, default_specs: HashMap<String, ToolSpec>) -> Self {
        let mut specs = default_specs;
        for (name, spec_config) in &config.tools {
            specs.insert(name.clone(), ToolSpec::from_config(spec_config));
        }
        Self {
            specs,
            autonomy: config.autonomy,
            risk_threshold: config.risk_threshold,
            tool_calls_budget: RollingWindow::new(
                "tool_calls",
                config.budgets.tool_calls_per_minute,
                Duration::from_secs_f64(config.budgets.tool_call_window_s.max(1.0)),
            ),
            expensive_budget: RollingWindow::new(
                "expensive_calls",
                config.budgets.expensive_calls_per_day,
                Duration::from_secs_f64(config.budgets.expensive_window_s.max(1.0)),
            ),
        }
    }

    pub fn spec_for(&self, name: &str) -> ToolSpec {
        self.specs.get(name).cloned().unwrap_or_default()
    }

    pub fn build_action_packet(&self, name: &str, call_id: &str, args: Value) -> ActionPacket {
        let spec = self.spec_for(name);
        let risk_score = estimate_risk(&spec);
        ActionPacket {
            name: name.to_string(),
            call_id: call_id.to_string(),
            args,
            estimated_cost: spec.cost,
            spec,
            risk_score,
            created_at: Instant::now(),
        }
    }

    pub fn review(&self, action: &ActionPacket) -> GovernanceDecision {
        self.review_at(action, Instant::now())
    }

    /// Decision ladder, first match wins.
    pub fn review_at(&self, action: &ActionPacket, now: Instant) -> GovernanceDecision {
        if self.autonomy == AutonomyLevel::ObserveOnly {
            return GovernanceDecision::new(
                DecisionStatus::Denied,
                "autonomy dial set to observe-only",
            );
        }

        if !self.tool_calls_budget.allow(now) {
            return GovernanceDecision::new(DecisionStatus::Denied, "tool-call budget exhausted");
        }

        if action.estimated_cost == CostHint::Expensive && !self.expensive_budget.allow(now) {
            return GovernanceDecision::new(
                DecisionStatus::Denied,
                "expensive-call budget exhausted",
            );
        }

        if action.spec.tier > 1 || action.risk_score >= self.risk_threshold {
            return GovernanceDecision::new(
                DecisionStatus::NeedsConfirmation,
                "tool tier requires confirmation",
            );
        }

        if matches!(self.autonomy, AutonomyLevel::Assist | AutonomyLevel::ActWithConfirm)
            && action.spec.tier > 0
        {
            return GovernanceDecision::new(
                DecisionStatus::NeedsConfirmation,
                "autonomy level requires confirmation",
            );
        }

        GovernanceDecision::new(DecisionStatus::Approved, "within bounds")
    }

    pub fn record_execution(&self, action: &ActionPacket) {
        self.record_execution_at(action, Instant::now());
    }

    pub fn record_execution_at(&self, action: &ActionPacket, now: Instant) {
        self.tool_calls_budget.record(now);
        if action.estimated_cost == CostHint::Expensive {
            self.expensive_budget.record(now);
        }
    }
}

/// `0.2 + 0.2·max(tier−1,0) + 0.2·[cost=expensive] + (reversible ? −0.1 : +0.1)`,
/// clamped to [0,1].
fn estimate_risk(spec: &ToolSpec) -> f64 {
    let base = 0.2;
    let tier_bump = 0.2 * (spec.tier.saturating_sub(1)) as f64;
    let cost_bump = if spec.cost == CostHint::Expensive { 0.2 } else { 0.0 };
    let reversible_bump = if spec.reversible { -0.1 } else { 0.1 };
    (base + tier_bump + cost_bump + reversible_bump).clamp(0.0, 1.0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use theo_config::BudgetConfig;

    fn config(autonomy: AutonomyLevel) -> GovernanceConfig {
        GovernanceConfig {
            autonomy,
            ..GovernanceConfig::default()
        }
    }

    fn layer(autonomy: AutonomyLevel) -> GovernanceLayer {
        GovernanceLayer::new(&config(autonomy), HashMap::new())
    }

    fn spec(tier: u8, reversible: bool, cost: CostHint) -> ToolSpec {
        ToolSpec {
            tier,
            reversible,
            cost,
            safety_tags: vec![],
        }
    }

    fn layer_with_spec(autonomy: AutonomyLevel, name: &str, spec: ToolSpec) -> GovernanceLayer {
        GovernanceLayer::new(
            &config(autonomy),
            [(name.to_string(), spec)].into_iter().collect(),
        )
    }

    // ── Risk formula ──────────────────────────────────────────────────────────

    #[test]
    fn risk_formula_matches_the_contract() {
        assert!((estimate_risk(&spec(0, true, CostHint::Cheap)) - 0.1).abs() < 1e-9);
        assert!((estimate_risk(&spec(1, false, CostHint::Med)) - 0.3).abs() < 1e-9);
        assert!((estimate_risk(&spec(2, false, CostHint::Med)) - 0.5).abs() < 1e-9);
        assert!((estimate_risk(&spec(3, false, CostHint::Expensive)) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn risk_is_clamped_to_unit_interval() {
        let very_risky = spec(5, false, CostHint::Expensive);
        assert_eq!(estimate_risk(&very_risky), 1.0);
    }

    // ── Decision ladder ───────────────────────────────────────────────────────

    #[test]
    fn observe_only_denies_everything() {
        let layer = layer_with_spec(
            AutonomyLevel::ObserveOnly,
            "read_battery_voltage",
            spec(0, true, CostHint::Cheap),
        );
        let packet = layer.build_action_packet("read_battery_voltage", "c1", json!({}));
        let decision = layer.review(&packet);
        assert!(decision.denied());
        assert!(decision.reason.contains("observe-only"));
    }

    #[test]
    fn tier_two_never_approves() {
        let layer = layer(AutonomyLevel::ActWithBounds);
        let packet = layer.build_action_packet("unknown_tool", "c1", json!({}));
        assert_eq!(packet.spec.tier, 2);
        assert!(layer.review(&packet).needs_confirmation());
    }

    #[test]
    fn low_tier_reversible_tool_approves_under_act_with_bounds() {
        let layer = layer_with_spec(
            AutonomyLevel::ActWithBounds,
            "read_environment",
            spec(0, true, CostHint::Cheap),
        );
        let packet = layer.build_action_packet("read_environment", "c1", json!({}));
        assert!(layer.review(&packet).approved());
    }

    #[test]
    fn assist_requires_confirmation_above_tier_zero() {
        let layer = layer_with_spec(
            AutonomyLevel::Assist,
            "gesture_nod",
            spec(1, true, CostHint::Cheap),
        );
        let packet = layer.build_action_packet("gesture_nod", "c1", json!({}));
        let decision = layer.review(&packet);
        assert!(decision.needs_confirmation());
        assert!(decision.reason.contains("autonomy level"));
    }

    #[test]
    fn assist_still_approves_tier_zero() {
        let layer = layer_with_spec(
            AutonomyLevel::Assist,
            "read_environment",
            spec(0, true, CostHint::Cheap),
        );
        let packet = layer.build_action_packet("read_environment", "c1", json!({}));
        assert!(layer.review(&packet).approved());
    }

    #[test]
    fn high_risk_needs_confirmation_even_at_low_tier() {
        // Tier 1, irreversible, expensive: risk = 0.2 + 0 + 0.2 + 0.1 = 0.5 < 0.6.
        // Push past the threshold by lowering it.
        let mut governance_config = config(AutonomyLevel::ActWithBounds);
        governance_config.risk_threshold = 0.4;
        let layer = GovernanceLayer::new(
            &governance_config,
            [("t".to_string(), spec(1, false, CostHint::Expensive))]
                .into_iter()
                .collect(),
        );
        let packet = layer.build_action_packet("t", "c1", json!({}));
        assert!(layer.review(&packet).needs_confirmation());
    }

    // ── Budgets ───────────────────────────────────────────────────────────────

    #[test]
    fn exhausted_tool_call_budget_denies() {
        let mut governance_config = config(AutonomyLevel::ActWithBounds);
        governance_config.budgets = BudgetConfig {
            tool_calls_per_minute: 2,
            ..BudgetConfig::default()
        };
        let layer = GovernanceLayer::new(
            &governance_config,
            [("t".to_string(), spec(0, true, CostHint::Cheap))]
                .into_iter()
                .collect(),
        );
        let packet = layer.build_action_packet("t", "c1", json!({}));
        let now = Instant::now();
        layer.record_execution_at(&packet, now);
        layer.record_execution_at(&packet, now);
        let decision = layer.review_at(&packet, now);
        assert!(decision.denied());
        assert!(decision.reason.contains("tool-call budget"));
    }

    #[test]
    fn expensive_budget_only_charges_expensive_calls() {
        let mut governance_config = config(AutonomyLevel::ActWithBounds);
        governance_config.budgets = BudgetConfig {
            expensive_calls_per_day: 1,
            ..BudgetConfig::default()
        };
        let specs: HashMap<String, ToolSpec> = [
            ("cheap_t".to_string(), spec(0, true, CostHint::Cheap)),
            ("pricey_t".to_string(), spec(0, true, CostHint::Expensive)),
        ]
        .into_iter()
        .collect();
        let layer = GovernanceLayer::new(&governance_config, specs);
        let now = Instant::now();

        let cheap = layer.build_action_packet("cheap_t", "c1", json!({}));
        layer.record_execution_at(&cheap, now);
        layer.record_execution_at(&cheap, now);

        let pricey = layer.build_action_packet("pricey_t", "c2", json!({}));
        assert!(layer.review_at(&pricey, now).approved());
        layer.record_execution_at(&pricey, now);
        let decision = layer.review_at(&pricey, now);
        assert!(decision.denied());
        assert!(decision.reason.contains("expensive-call budget"));
    }

    // ── Spec resolution ───────────────────────────────────────────────────────

    #[test]
    fn config_overrides_beat_registry_defaults() {
        let mut governance_config = config(AutonomyLevel::ActWithBounds);
        governance_config.tools.insert(
            "t".into(),
            theo_config::ToolSpecConfig {
                tier: 0,
                reversible: true,
                cost_hint: "cheap".into(),
                safety_tags: vec![],
            },
        );
        let layer = GovernanceLayer::new(
            &governance_config,
            [("t".to_string(), spec(3, false, CostHint::Expensive))]
                .into_iter()
                .collect(),
        );
        assert_eq!(layer.spec_for("t").tier, 0);
    }

    #[test]
    fn packet_summary_mentions_the_essentials() {
        let layer = layer(AutonomyLevel::ActWithBounds);
        let packet = layer.build_action_packet("set_pan", "c9", json!({"degrees": 30}));
        let summary = packet.summary();
        assert!(summary.contains("tool=set_pan"));
        assert!(summary.contains("tier=2"));
    }
}
