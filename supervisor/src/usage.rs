//! UsageTracker: per-agent token/cost accumulation (SPEC_FULL §4.6).
//!
//! Grounded in the teacher's `state/types.rs::ModelResult` token/cost
//! fields; the supplemented `cost_breakdown_by_agent` view (SPEC_FULL §3.1)
//! follows the same per-model cost tracking shape.

use std::collections::HashMap;

use serde::Deserialize;

use crate::run::{AgentName, ModelTier, Usage, UsageTotals};

/// Token counts an agent CLI reports on its own final line, mirroring the
/// `--output-format json` summary line real agent CLIs emit on exit. Cost is
/// deliberately absent: the supervisor derives it from [`PriceTable`] rather
/// than trusting a self-reported dollar figure.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

/// Scan `capture` (an agent pane's scrollback) from the bottom for the last
/// line that parses as a [`RawUsage`] JSON object, per SPEC_FULL §4.6 ("reads
/// are refreshed at agent completion"). Agents are expected to print one
/// such line before exiting; absence of one just means zero usage is
/// recorded for that run, not an error.
pub fn parse_pane_usage(capture: &str) -> Option<RawUsage> {
    const USAGE_KEYS: [&str; 4] =
        ["input_tokens", "output_tokens", "cache_creation_tokens", "cache_read_tokens"];

    capture.lines().rev().find_map(|line| {
        let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
        let object = value.as_object()?;
        if !USAGE_KEYS.iter().any(|key| object.contains_key(*key)) {
            return None;
        }
        serde_json::from_value(value).ok()
    })
}

/// Dollars per 1K tokens, by tier, input/output priced separately. A fixed
/// table rather than a live pricing API, per SPEC_FULL §4.6 ("derived from
/// token counts via a fixed per-tier price table").
#[derive(Debug, Clone, Copy)]
pub struct TierPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<ModelTier, TierPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let mut prices = HashMap::new();
        prices.insert(ModelTier::Low, TierPrice { input_per_1k: 0.0008, output_per_1k: 0.0024 });
        prices.insert(ModelTier::Mid, TierPrice { input_per_1k: 0.003, output_per_1k: 0.015 });
        prices.insert(ModelTier::High, TierPrice { input_per_1k: 0.015, output_per_1k: 0.075 });
        Self { prices }
    }
}

impl PriceTable {
    pub fn cost_usd(&self, tier: ModelTier, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self.prices.get(&tier).copied().unwrap_or(TierPrice {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        });
        (input_tokens as f64 / 1000.0) * price.input_per_1k
            + (output_tokens as f64 / 1000.0) * price.output_per_1k
    }
}

/// Per-agent usage accumulator plus the run-level totals view persisted in
/// `state.json`.
#[derive(Debug, Default)]
pub struct UsageTracker {
    prices: PriceTable,
    per_agent: HashMap<AgentName, Usage>,
}

impl UsageTracker {
    pub fn new(prices: PriceTable) -> Self {
        Self {
            prices,
            per_agent: HashMap::new(),
        }
    }

    /// Record a usage delta for `agent` at `tier`, computing cost from the
    /// fixed price table.
    pub fn record(&mut self, agent: AgentName, tier: ModelTier, input_tokens: u64, output_tokens: u64, cache_creation_tokens: u64, cache_read_tokens: u64) {
        let cost = self.prices.cost_usd(tier, input_tokens, output_tokens);
        let entry = self.per_agent.entry(agent).or_default();
        entry.add(&Usage {
            input_tokens,
            output_tokens,
            cache_creation_tokens,
            cache_read_tokens,
            cost_usd: cost,
        });
    }

    pub fn for_agent(&self, agent: AgentName) -> Usage {
        self.per_agent.get(&agent).copied().unwrap_or_default()
    }

    /// Sum across every agent, matching the `usage` block persisted in
    /// `state.json` (SPEC_FULL §6).
    pub fn totals(&self) -> UsageTotals {
        let mut totals = UsageTotals::default();
        for usage in self.per_agent.values() {
            totals.total_input_tokens += usage.input_tokens;
            totals.total_output_tokens += usage.output_tokens;
            totals.total_cache_creation_tokens += usage.cache_creation_tokens;
            totals.total_cache_read_tokens += usage.cache_read_tokens;
            totals.total_cost_usd += usage.cost_usd;
        }
        totals
    }

    /// Supplemented view (SPEC_FULL §3.1) for the CLI/dashboard: cost per
    /// agent rather than only the grand total.
    pub fn cost_breakdown_by_agent(&self) -> HashMap<AgentName, f64> {
        self.per_agent
            .iter()
            .map(|(agent, usage)| (*agent, usage.cost_usd))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_across_agents() {
        let mut tracker = UsageTracker::new(PriceTable::default());
        tracker.record(AgentName::Builder, ModelTier::Mid, 1000, 500, 0, 0);
        tracker.record(AgentName::Verifier, ModelTier::Low, 2000, 1000, 0, 0);
        let totals = tracker.totals();
        assert_eq!(totals.total_input_tokens, 3000);
        assert_eq!(totals.total_output_tokens, 1500);
        assert!(totals.total_cost_usd > 0.0);
    }

    #[test]
    fn cost_breakdown_has_one_entry_per_recorded_agent() {
        let mut tracker = UsageTracker::new(PriceTable::default());
        tracker.record(AgentName::Builder, ModelTier::High, 100, 100, 0, 0);
        let breakdown = tracker.cost_breakdown_by_agent();
        assert_eq!(breakdown.len(), 1);
        assert!(breakdown[&AgentName::Builder] > 0.0);
    }

    #[test]
    fn higher_tier_costs_more_for_equal_tokens() {
        let table = PriceTable::default();
        let low = table.cost_usd(ModelTier::Low, 1000, 1000);
        let high = table.cost_usd(ModelTier::High, 1000, 1000);
        assert!(high > low);
    }

    #[test]
    fn unwatched_agent_reports_zero_usage() {
        let tracker = UsageTracker::new(PriceTable::default());
        assert_eq!(tracker.for_agent(AgentName::Gatekeeper), Usage::default());
    }

    #[test]
    fn parse_pane_usage_finds_trailing_json_line() {
        let capture = "some log output\nmore output\n{\"input_tokens\":120,\"output_tokens\":45,\"cache_creation_tokens\":0,\"cache_read_tokens\":10}\n";
        let usage = parse_pane_usage(capture).unwrap();
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 45);
        assert_eq!(usage.cache_read_tokens, 10);
    }

    #[test]
    fn parse_pane_usage_ignores_unrelated_trailing_json() {
        let capture = "{\"input_tokens\":120,\"output_tokens\":45}\n{\"status\":\"ok\"}\n";
        let usage = parse_pane_usage(capture).unwrap();
        assert_eq!(usage.input_tokens, 120);
    }

    #[test]
    fn parse_pane_usage_is_none_without_a_usage_line() {
        assert!(parse_pane_usage("plain text\nno json here\n").is_none());
    }
}
