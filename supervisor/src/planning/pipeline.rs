//! PlanningPipeline: Planner↔Critic iteration with convergence and
//! auto-approve rules (SPEC_FULL §4.15).
//!
//! Grounded directly in `debate/orchestrator.rs::DebateOrchestrator` — the
//! coder↔reviewer loop with guardrail-driven deadlock detection maps
//! one-for-one onto the Planner↔Critic loop here, renamed and re-targeted
//! at `Critique` items instead of a generic consensus check.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::run::dir::atomic_write;

use super::types::{Critique, PlanDraft};

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("io error persisting planning artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A single Planner/Critic round, as the caller supplies it; the agents
/// themselves are external processes (out of scope per §1) — the pipeline
/// only needs their structured outputs.
pub trait PlannerAgent {
    fn draft(&mut self, description: &str, revision_instructions: Option<&str>) -> PlanDraft;
}

pub trait CriticAgent {
    fn critique(&mut self, draft: &PlanDraft, history: &[Critique]) -> Critique;
}

#[derive(Debug, Clone, Copy)]
pub struct PlanningConfig {
    pub max_iterations: u32,
    pub convergence_threshold: f64,
    pub auto_approve_max_minor: u32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            convergence_threshold: 0.7,
            auto_approve_max_minor: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanningOutcome {
    Approved { final_draft_version: u32 },
    NeedsHuman { reason: String },
}

/// Drives the Planner↔Critic loop, persisting each round's artifacts under
/// `planning/` (SPEC_FULL §4.15 step 1).
pub struct PlanningPipeline {
    dir: PathBuf,
    config: PlanningConfig,
}

impl PlanningPipeline {
    pub fn new(dir: impl Into<PathBuf>, config: PlanningConfig) -> Self {
        Self { dir: dir.into(), config }
    }

    fn draft_path(&self, version: u32) -> PathBuf {
        self.dir.join(format!("draft-v{version}.json"))
    }

    fn critique_path(&self, version: u32) -> PathBuf {
        self.dir.join(format!("critique-v{version}.json"))
    }

    fn final_path(&self) -> PathBuf {
        self.dir.join("final.json")
    }

    fn persist<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), PlanningError> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(value)?;
        atomic_write(path, &bytes)?;
        Ok(())
    }

    /// Run the full loop (SPEC_FULL §4.15 steps 2a-2f, 3).
    pub fn run(
        &self,
        description: &str,
        planner: &mut dyn PlannerAgent,
        critic: &mut dyn CriticAgent,
    ) -> Result<PlanningOutcome, PlanningError> {
        let mut history: Vec<Critique> = Vec::new();
        let mut previous_critique: Option<Critique> = None;

        for iteration in 1..=self.config.max_iterations {
            let revision_instructions = previous_critique.as_ref().map(|critique| {
                critique
                    .revision_worthy_items()
                    .iter()
                    .map(|item| format!("- [{:?}] {}: {}", item.severity, item.title, item.description))
                    .collect::<Vec<_>>()
                    .join("\n")
            });

            let draft = planner.draft(description, revision_instructions.as_deref());
            self.persist(&self.draft_path(iteration), &draft)?;

            let critique = critic.critique(&draft, &history);
            self.persist(&self.critique_path(iteration), &critique)?;

            if let Some(prev) = &previous_critique {
                if convergence_ratio(prev, &critique) > self.config.convergence_threshold {
                    return Ok(PlanningOutcome::NeedsHuman {
                        reason: "converging critique overlap exceeds threshold".to_string(),
                    });
                }
            }

            if critique.satisfies_auto_approve(self.config.auto_approve_max_minor) {
                self.persist(&self.final_path(), &draft)?;
                return Ok(PlanningOutcome::Approved { final_draft_version: iteration });
            }

            if matches!(critique.verdict, super::types::CritiqueVerdict::NeedsHuman) {
                return Ok(PlanningOutcome::NeedsHuman {
                    reason: "critic requested human review".to_string(),
                });
            }

            history.push(critique.clone());
            previous_critique = Some(critique);
        }

        Ok(PlanningOutcome::NeedsHuman {
            reason: "max iterations without convergence".to_string(),
        })
    }
}

/// `|items_prev ∩ items_curr| / |items_prev|` over the overlap keys
/// (SPEC_FULL §4.15 step 2c).
fn convergence_ratio(prev: &Critique, curr: &Critique) -> f64 {
    let prev_keys = prev.item_keys();
    if prev_keys.is_empty() {
        return 0.0;
    }
    let curr_keys = curr.item_keys();
    let overlap = prev_keys.intersection(&curr_keys).count();
    overlap as f64 / prev_keys.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::types::{CritiqueItem, CritiqueStats, CritiqueTarget, CritiqueVerdict, Severity};

    fn draft(version: u32) -> PlanDraft {
        PlanDraft {
            version,
            phases: serde_json::json!([]),
        }
    }

    fn item(id: &str, category: &str, severity: Severity) -> CritiqueItem {
        CritiqueItem {
            id: id.into(),
            severity,
            category: category.into(),
            target: CritiqueTarget { kind: "phase".into(), id: Some("1".into()) },
            title: "issue".into(),
            description: "desc".into(),
            suggestion: None,
        }
    }

    struct FixedPlanner;
    impl PlannerAgent for FixedPlanner {
        fn draft(&mut self, _description: &str, _revision_instructions: Option<&str>) -> PlanDraft {
            draft(1)
        }
    }

    struct ApprovingCritic;
    impl CriticAgent for ApprovingCritic {
        fn critique(&mut self, _draft: &PlanDraft, _history: &[Critique]) -> Critique {
            Critique {
                version: 1,
                verdict: CritiqueVerdict::Approved,
                items: vec![],
                stats: CritiqueStats::default(),
            }
        }
    }

    #[test]
    fn approving_critic_converges_on_first_iteration() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = PlanningPipeline::new(tmp.path(), PlanningConfig::default());
        let outcome = pipeline
            .run("make it good", &mut FixedPlanner, &mut ApprovingCritic)
            .unwrap();
        assert_eq!(outcome, PlanningOutcome::Approved { final_draft_version: 1 });
        assert!(tmp.path().join("final.json").is_file());
    }

    struct StuckCritic;
    impl CriticAgent for StuckCritic {
        fn critique(&mut self, _draft: &PlanDraft, _history: &[Critique]) -> Critique {
            let items = vec![
                item("1", "design", Severity::Critical),
                item("2", "design", Severity::Critical),
            ];
            Critique {
                version: 1,
                verdict: CritiqueVerdict::NeedsRevision,
                stats: CritiqueStats::from_items(&items),
                items,
            }
        }
    }

    #[test]
    fn repeated_identical_critique_triggers_needs_human_via_convergence() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = PlanningPipeline::new(tmp.path(), PlanningConfig::default());
        let outcome = pipeline
            .run("make it good", &mut FixedPlanner, &mut StuckCritic)
            .unwrap();
        assert!(matches!(outcome, PlanningOutcome::NeedsHuman { .. }));
    }

    struct AlwaysNeedsRevisionNoOverlapCritic {
        call: std::cell::Cell<u32>,
    }
    impl CriticAgent for AlwaysNeedsRevisionNoOverlapCritic {
        fn critique(&mut self, _draft: &PlanDraft, _history: &[Critique]) -> Critique {
            let n = self.call.get();
            self.call.set(n + 1);
            let items = vec![item(&format!("call-{n}"), &format!("cat-{n}"), Severity::Major)];
            Critique {
                version: 1,
                verdict: CritiqueVerdict::NeedsRevision,
                stats: CritiqueStats::from_items(&items),
                items,
            }
        }
    }

    #[test]
    fn exhausting_iterations_without_convergence_or_approval_needs_human() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = PlanningPipeline::new(tmp.path(), PlanningConfig::default());
        let mut critic = AlwaysNeedsRevisionNoOverlapCritic { call: std::cell::Cell::new(0) };
        let outcome = pipeline.run("make it good", &mut FixedPlanner, &mut critic).unwrap();
        assert_eq!(
            outcome,
            PlanningOutcome::NeedsHuman { reason: "max iterations without convergence".to_string() }
        );
    }
}
