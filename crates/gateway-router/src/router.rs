//! # Smart Router (C7)
//!
//! Classifies each request into a tier (§4.7) and tracks the tie-break
//! policy: when both Tier 1 and Tier 2 patterns would match, Tier 1 wins;
//! when Tier 2 fails to produce a valid template, the router escalates to
//! Tier 3 rather than failing.

use crate::templates::{try_match, ExtractedParams};
use gateway_core::events::EventKind;
use gateway_warehouse::EventLogger;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    /// Closed-set pattern match, skips any NL step. Target latency ≤ 2s.
    Tier1,
    /// Constrained interpreter picks a Tier-1-compatible template or replies directly. Budget ≈ 8s.
    Tier2,
    /// Full NL-to-plan interpreter. Budget ≈ 30s.
    Tier3,
}

impl Tier {
    pub fn expected_ms(&self) -> u64 {
        match self {
            Tier::Tier1 => 2_000,
            Tier::Tier2 => 8_000,
            Tier::Tier3 => 30_000,
        }
    }

    pub fn expected_cost(&self) -> f64 {
        match self {
            Tier::Tier1 => 0.001,
            Tier::Tier2 => 0.05,
            Tier::Tier3 => 0.20,
        }
    }

    /// `expected_ms` rounded up to whole seconds, used as the planner's
    /// runtime estimate when checking the envelope's daily runtime budget
    /// before a request is ever sent to the warehouse (§5, §8 scenario 6).
    pub fn expected_seconds(&self) -> i64 {
        ((self.expected_ms() + 999) / 1000) as i64
    }

    /// Hard wall-clock budget the orchestrator enforces (§5).
    pub fn wall_budget(&self) -> Option<Duration> {
        match self {
            Tier::Tier1 => None,
            Tier::Tier2 => Some(Duration::from_secs(10)),
            Tier::Tier3 => Some(Duration::from_secs(45)),
        }
    }
}

/// Analytic-language cues that rule out Tier 1 even if no closed template
/// matched (compare/trend/filter vocabulary; §4.7).
const TIER2_CUES: [&str; 6] = ["compare", "trend", "filter", "versus", "vs ", "change over"];
/// Narrative/multi-source cues that push straight to Tier 3.
const TIER3_CUES: [&str; 4] = ["report", "across all", "narrative", "story"];

#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub tier: Tier,
    pub template: Option<String>,
    pub params: Option<ExtractedParams>,
    pub confidence: f64,
    pub reasoning: String,
}

/// `classify(request)` (§4.7). Tier 1 wins any tie against Tier 2; Tier 3 is
/// reserved for requests carrying narrative/multi-source cues.
pub fn classify(text: &str) -> RoutingDecision {
    let lower = text.to_lowercase();

    if let Some(params) = try_match(&lower) {
        return RoutingDecision {
            tier: Tier::Tier1,
            template: Some(params.template.name().to_string()),
            params: Some(params),
            confidence: 0.95,
            reasoning: "matched a closed-set Tier 1 template".to_string(),
        };
    }

    if TIER3_CUES.iter().any(|cue| lower.contains(cue)) {
        return RoutingDecision {
            tier: Tier::Tier3,
            template: None,
            params: None,
            confidence: 0.8,
            reasoning: "narrative or multi-source cues present".to_string(),
        };
    }

    if TIER2_CUES.iter().any(|cue| lower.contains(cue)) {
        return RoutingDecision {
            tier: Tier::Tier2,
            template: None,
            params: None,
            confidence: 0.7,
            reasoning: "analytic language present, no closed template matched".to_string(),
        };
    }

    RoutingDecision {
        tier: Tier::Tier3,
        template: None,
        params: None,
        confidence: 0.4,
        reasoning: "no tier 1 or tier 2 signal, falling back to full interpretation".to_string(),
    }
}

/// Tier 2's interpreter failed to produce a valid template — escalate to
/// Tier 3 rather than failing the request (§4.7 tie-break policy).
pub fn escalate_after_tier2_failure(decision: &RoutingDecision) -> RoutingDecision {
    RoutingDecision {
        tier: Tier::Tier3,
        template: None,
        params: None,
        confidence: decision.confidence * 0.5,
        reasoning: "tier 2 interpreter failed to produce a valid template, escalating".to_string(),
    }
}

/// Emits `mcp.query.routed` with the outcome once the request has actually
/// run, so the rolling cost/latency projection reflects reality rather than
/// the estimate (§4.7).
pub async fn log_routing_outcome(
    logger: &EventLogger,
    decision: &RoutingDecision,
    actual_ms: u64,
    actual_cost: f64,
    success: bool,
) -> gateway_core::GatewayResult<()> {
    logger
        .log(EventKind::QueryRouted {
            tier: match decision.tier {
                Tier::Tier1 => 1,
                Tier::Tier2 => 2,
                Tier::Tier3 => 3,
            },
            template: decision.template.clone(),
            expected_ms: decision.tier.expected_ms(),
            actual_ms,
            expected_cost: decision.tier.expected_cost(),
            actual_cost,
            success,
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier1_template_wins_even_with_tier2_cues_present() {
        let decision = classify("show me the top 10 pages, compare to last week");
        assert_eq!(decision.tier, Tier::Tier1);
    }

    #[test]
    fn analytic_language_without_a_template_is_tier2() {
        let decision = classify("compare signups this month to last month");
        assert_eq!(decision.tier, Tier::Tier2);
    }

    #[test]
    fn narrative_request_is_tier3() {
        let decision = classify("write me a report across all regions");
        assert_eq!(decision.tier, Tier::Tier3);
    }

    #[test]
    fn tier2_failure_escalates_to_tier3() {
        let initial = classify("compare trends");
        let escalated = escalate_after_tier2_failure(&initial);
        assert_eq!(escalated.tier, Tier::Tier3);
    }
}
