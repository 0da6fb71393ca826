//! ModelSelector: briefing text → per-agent model tier map (SPEC_FULL §4.9).
//!
//! Grounded directly in `router/classifier.rs::PreRoutingClassifier` —
//! the same keyword/weighted-scoring architecture (incremental score bumps
//! from keyword matches, a final weighted sum mapped to discrete bands) is
//! reused here over the four 0-100 dimensions the spec defines, and
//! `router/task_classifier.rs::ModelTier` donates the tier enum shape
//! (renamed `low/mid/high` to match SPEC_FULL's vocabulary).

use serde::{Deserialize, Serialize};

use crate::run::{AgentName, ModelTier, SelectedModels};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    CostOptimized,
    Balanced,
    QualityFirst,
    PerformanceFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Medium,
    Complex,
}

/// Bilingual (English/Spanish) keyword lists per scoring category. Kept
/// small and explicit rather than loaded from a resource file, matching the
/// teacher's inline `const` keyword arrays in `router/classifier.rs`.
struct Keywords {
    technical_depth: &'static [&'static str],
    scope: &'static [&'static str],
    risk: &'static [&'static str],
}

const KEYWORDS: Keywords = Keywords {
    technical_depth: &[
        "architecture", "arquitectura", "async", "concurrency", "concurrencia",
        "distributed", "distribuido", "algorithm", "algoritmo", "protocol",
        "protocolo", "performance", "rendimiento", "security", "seguridad",
        "cryptograph", "criptograf", "lock-free", "consensus", "consenso",
    ],
    scope: &[
        "migrate", "migrar", "rewrite", "reescribir", "refactor", "entire",
        "completo", "across the codebase", "todo el proyecto", "multi-module",
        "multi-modulo", "end-to-end", "de extremo a extremo", "system-wide",
        "a nivel de sistema",
    ],
    risk: &[
        "production", "produccion", "payment", "pago", "auth", "autenticacion",
        "breaking change", "cambio disruptivo", "data loss", "perdida de datos",
        "irreversible", "delete", "eliminar", "migration", "migracion",
        "security", "seguridad",
    ],
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionAnalysis {
    pub length_score: u8,
    pub technical_depth_score: u8,
    pub scope_estimate_score: u8,
    pub risk_level_score: u8,
    pub weighted_score: f64,
    pub level: ComplexityLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResult {
    pub models: SelectedModels,
    pub analysis: SelectionAnalysis,
    pub selection_method: String,
    pub estimated_savings_pct: f64,
}

/// `{refiner, builder, verifier, gatekeeper} -> mid` — the static fallback
/// when dynamic selection is disabled.
fn static_default() -> SelectedModels {
    let mut models = SelectedModels::default();
    for agent in AgentName::ALL {
        models.set(agent, ModelTier::Mid);
    }
    models
}

fn length_score(briefing: &str) -> u8 {
    let chars = briefing.chars().count() as f64;
    let base = if chars < 500.0 {
        (chars / 500.0) * 50.0
    } else if chars < 2000.0 {
        50.0 + ((chars - 500.0) / 1500.0) * 30.0
    } else {
        (80.0 + ((chars - 2000.0) / chars.max(2001.0)) * 20.0).min(100.0)
    };
    let line_bonus = if briefing.lines().count() > 20 { 10.0 } else { 0.0 };
    (base + line_bonus).clamp(0.0, 100.0) as u8
}

fn keyword_score(text: &str, keywords: &[&str]) -> u8 {
    let lower = text.to_lowercase();
    let matched = keywords.iter().filter(|kw| lower.contains(*kw)).count();
    if keywords.is_empty() {
        return 0;
    }
    ((matched as f64 / keywords.len() as f64) * 100.0).min(100.0) as u8
}

fn weighted_sum(length: u8, technical: u8, scope: u8, risk: u8) -> f64 {
    0.1 * length as f64 + 0.4 * technical as f64 + 0.2 * scope as f64 + 0.3 * risk as f64
}

fn level_for(score: f64) -> ComplexityLevel {
    if score < 30.0 {
        ComplexityLevel::Simple
    } else if score < 60.0 {
        ComplexityLevel::Medium
    } else {
        ComplexityLevel::Complex
    }
}

/// Deterministic per-strategy `{level -> {agent -> tier}}` table.
fn tier_map(strategy: SelectionStrategy, level: ComplexityLevel) -> SelectedModels {
    use ComplexityLevel::*;
    use ModelTier::*;
    use SelectionStrategy::*;

    let (refiner, builder, verifier, gatekeeper) = match (strategy, level) {
        (CostOptimized, Simple) => (Low, Low, Low, Low),
        (CostOptimized, Medium) => (Low, Low, Mid, Low),
        (CostOptimized, Complex) => (Low, Mid, Mid, Low),

        (Balanced, Simple) => (Low, Low, Low, Mid),
        (Balanced, Medium) => (Low, Mid, Mid, Mid),
        (Balanced, Complex) => (Mid, High, High, Mid),

        (QualityFirst, Simple) => (Mid, Mid, Mid, High),
        (QualityFirst, Medium) => (Mid, High, High, High),
        (QualityFirst, Complex) => (High, High, High, High),

        (PerformanceFirst, Simple) => (Mid, Low, Low, Mid),
        (PerformanceFirst, Medium) => (Mid, Mid, Mid, Mid),
        (PerformanceFirst, Complex) => (High, Mid, Mid, High),
    };

    let mut models = SelectedModels::default();
    models.set(AgentName::Refiner, refiner);
    models.set(AgentName::Builder, builder);
    models.set(AgentName::Verifier, verifier);
    models.set(AgentName::Gatekeeper, gatekeeper);
    models
}

fn tier_rank(tier: ModelTier) -> u8 {
    match tier {
        ModelTier::Low => 0,
        ModelTier::Mid => 1,
        ModelTier::High => 2,
    }
}

/// Percentage of max-tier spend saved relative to the static default map.
fn estimated_savings(selected: &SelectedModels, default: &SelectedModels) -> f64 {
    let selected_total: u32 = AgentName::ALL.iter().map(|a| tier_rank(selected.get(*a)) as u32).sum();
    let default_total: u32 = AgentName::ALL.iter().map(|a| tier_rank(default.get(*a)) as u32).sum();
    if default_total == 0 {
        return 0.0;
    }
    ((default_total as f64 - selected_total as f64) / default_total as f64 * 100.0).max(0.0)
}

#[derive(Debug, Default)]
pub struct ModelSelector {
    pub dynamic_enabled: bool,
}

impl ModelSelector {
    pub fn new(dynamic_enabled: bool) -> Self {
        Self { dynamic_enabled }
    }

    /// Deterministic: the same `(briefing, strategy)` pair always produces
    /// a byte-identical `SelectionResult` (SPEC_FULL §8, testable property
    /// 6) — every step here is pure text analysis over fixed tables, no
    /// clock or RNG input.
    pub fn select(&self, briefing: &str, strategy: SelectionStrategy) -> SelectionResult {
        let default = static_default();
        if !self.dynamic_enabled {
            return SelectionResult {
                models: default.clone(),
                analysis: SelectionAnalysis {
                    length_score: 0,
                    technical_depth_score: 0,
                    scope_estimate_score: 0,
                    risk_level_score: 0,
                    weighted_score: 0.0,
                    level: ComplexityLevel::Simple,
                },
                selection_method: "static".into(),
                estimated_savings_pct: 0.0,
            };
        }

        let length = length_score(briefing);
        let technical = keyword_score(briefing, KEYWORDS.technical_depth);
        let scope = keyword_score(briefing, KEYWORDS.scope);
        let risk = keyword_score(briefing, KEYWORDS.risk);
        let weighted = weighted_sum(length, technical, scope, risk);
        let level = level_for(weighted);
        let models = tier_map(strategy, level);

        SelectionResult {
            estimated_savings_pct: estimated_savings(&models, &default),
            models,
            analysis: SelectionAnalysis {
                length_score: length,
                technical_depth_score: technical,
                scope_estimate_score: scope,
                risk_level_score: risk,
                weighted_score: weighted,
                level,
            },
            selection_method: "dynamic".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_disabled_returns_static_default() {
        let selector = ModelSelector::new(false);
        let result = selector.select("anything", SelectionStrategy::Balanced);
        assert_eq!(result.selection_method, "static");
        assert_eq!(result.models.refiner, ModelTier::Mid);
    }

    #[test]
    fn determinism_same_input_same_output() {
        let selector = ModelSelector::new(true);
        let a = selector.select("Migrate the payment service architecture", SelectionStrategy::QualityFirst);
        let b = selector.select("Migrate the payment service architecture", SelectionStrategy::QualityFirst);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn short_plain_briefing_is_simple() {
        let selector = ModelSelector::new(true);
        let result = selector.select("Fix typo in README", SelectionStrategy::Balanced);
        assert_eq!(result.analysis.level, ComplexityLevel::Simple);
    }

    #[test]
    fn high_risk_architecture_briefing_is_complex() {
        let selector = ModelSelector::new(true);
        let briefing = "Migrate the entire production payment authentication architecture, \
                         this is an irreversible breaking change touching the distributed consensus protocol.";
        let result = selector.select(briefing, SelectionStrategy::Balanced);
        assert_eq!(result.analysis.level, ComplexityLevel::Complex);
    }

    #[test]
    fn quality_first_never_picks_lower_tier_than_cost_optimized_at_same_level() {
        let selector = ModelSelector::new(true);
        let briefing = "Refactor the module";
        let cost = selector.select(briefing, SelectionStrategy::CostOptimized);
        let quality = selector.select(briefing, SelectionStrategy::QualityFirst);
        for agent in AgentName::ALL {
            assert!(tier_rank(quality.models.get(agent)) >= tier_rank(cost.models.get(agent)));
        }
    }

    #[test]
    fn level_boundaries_match_spec_thresholds() {
        assert_eq!(level_for(29.9), ComplexityLevel::Simple);
        assert_eq!(level_for(30.0), ComplexityLevel::Medium);
        assert_eq!(level_for(59.9), ComplexityLevel::Medium);
        assert_eq!(level_for(60.0), ComplexityLevel::Complex);
    }
}
