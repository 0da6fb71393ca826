//! Scenario 6 (SPEC_FULL §8): a Planner/Critic loop that never converges
//! and never earns auto-approval routes to `needs_human` once the
//! critique overlap between consecutive rounds crosses the convergence
//! threshold. Pure in-memory `PlanningPipeline` test; no Orchestrator,
//! pty, or fake agent involved.

use supervisor::planning::{
    CriticAgent, PlanDraft, PlannerAgent, PlanningConfig, PlanningOutcome, PlanningPipeline,
};
use supervisor::planning::{Critique, CritiqueItem, CritiqueStats, CritiqueTarget, CritiqueVerdict, Severity};

struct OneShotPlanner;

impl PlannerAgent for OneShotPlanner {
    fn draft(&mut self, _description: &str, _revision_instructions: Option<&str>) -> PlanDraft {
        PlanDraft { version: 1, phases: serde_json::json!([{"name": "phase-1"}]) }
    }
}

fn critical_item(id: &str) -> CritiqueItem {
    CritiqueItem {
        id: id.into(),
        severity: Severity::Critical,
        category: "design".into(),
        target: CritiqueTarget { kind: "phase".into(), id: Some("1".into()) },
        title: "ambiguous rollback plan".into(),
        description: "the draft never says how to roll back a bad deploy".into(),
        suggestion: None,
    }
}

/// A critic that keeps raising the same unresolved objection: since the
/// planner never revises its draft in response, the critique never
/// changes round to round, so its overlap with the previous round stays
/// at 100% and trips the convergence-based escape hatch.
struct StuckCritic;

impl CriticAgent for StuckCritic {
    fn critique(&mut self, _draft: &PlanDraft, _history: &[Critique]) -> Critique {
        let items = vec![critical_item("rollback")];
        Critique {
            version: 1,
            verdict: CritiqueVerdict::NeedsRevision,
            stats: CritiqueStats::from_items(&items),
            items,
        }
    }
}

#[test]
fn repeated_unresolved_critique_routes_to_needs_human() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = PlanningPipeline::new(tmp.path(), PlanningConfig::default());

    let outcome = pipeline
        .run("add a canary rollout to the deploy pipeline", &mut OneShotPlanner, &mut StuckCritic)
        .unwrap();

    assert!(matches!(outcome, PlanningOutcome::NeedsHuman { .. }));
    assert!(tmp.path().join("draft-v1.json").is_file());
    assert!(tmp.path().join("critique-v1.json").is_file());
    assert!(!tmp.path().join("final.json").exists());
}
