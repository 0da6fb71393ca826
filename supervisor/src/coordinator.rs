//! AgentCoordinator: decides "transition" vs "wait for human" on every
//! agent-completion signal (SPEC_FULL §4.12).
//!
//! Grounded in `events/bus.rs`'s fan-in shape for the events it emits, and
//! in the Design Notes' "CRP detection happens before transition for the
//! same completing agent" ordering guarantee (SPEC_FULL §5).

use std::path::Path;

use crate::run::{AgentName, RunDirectory, RunPhase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    WaitForHuman { crp_id: String },
    Transition { next_phase: RunPhase, next_agent: Option<AgentName> },
}

/// Scans `crp/` and `vcr/` in the run directory for an unresolved CRP: a
/// CRP id with no matching VCR file. SPEC_FULL §4.12 step 1.
pub fn find_unresolved_crp(dir: &RunDirectory) -> std::io::Result<Option<String>> {
    let crp_ids = list_json_stems(&dir.crp_dir())?;
    let vcr_ids: std::collections::HashSet<String> = list_json_stems(&dir.vcr_dir())?
        .into_iter()
        .map(|vcr_id| vcr_id_to_crp_id(&vcr_id, dir))
        .collect::<std::io::Result<_>>()?;

    for crp_id in crp_ids {
        if !vcr_ids.contains(&crp_id) {
            return Ok(Some(crp_id));
        }
    }
    Ok(None)
}

fn list_json_stems(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut ids = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(stem) = name.strip_suffix(".json") {
                ids.push(stem.to_string());
            }
        }
    }
    Ok(ids)
}

fn vcr_id_to_crp_id(vcr_id: &str, dir: &RunDirectory) -> std::io::Result<String> {
    let bytes = std::fs::read(dir.vcr_file(vcr_id))?;
    let vcr: crate::run::HumanResolution = serde_json::from_slice(&bytes)?;
    Ok(vcr.crp_id)
}

/// The next phase in the pipeline once `current` completes without needing
/// a human, and the agent that owns it.
fn next_phase_and_agent(current: RunPhase) -> (RunPhase, Option<AgentName>) {
    match current {
        RunPhase::Refine => (RunPhase::Build, Some(AgentName::Builder)),
        RunPhase::Build => (RunPhase::Verify, Some(AgentName::Verifier)),
        RunPhase::Verify => (RunPhase::Gate, Some(AgentName::Gatekeeper)),
        other => (other, None),
    }
}

/// On a `done(agent)` signal, decide whether the run should wait for a
/// human or transition to the next phase (SPEC_FULL §4.12, steps 1-2).
pub struct AgentCoordinator;

impl AgentCoordinator {
    pub fn decide(dir: &RunDirectory, current_phase: RunPhase) -> std::io::Result<CoordinatorAction> {
        if let Some(crp_id) = find_unresolved_crp(dir)? {
            return Ok(CoordinatorAction::WaitForHuman { crp_id });
        }
        let (next_phase, next_agent) = next_phase_and_agent(current_phase);
        Ok(CoordinatorAction::Transition { next_phase, next_agent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::new_run_id;
    use chrono::Utc;

    fn dir_with_setup(f: impl FnOnce(&RunDirectory)) -> (tempfile::TempDir, RunDirectory) {
        let tmp = tempfile::tempdir().unwrap();
        let run_id = new_run_id(Utc::now());
        let dir = RunDirectory::new(tmp.path(), "supervisor", &run_id);
        dir.ensure_created().unwrap();
        f(&dir);
        (tmp, dir)
    }

    #[test]
    fn no_crps_means_no_unresolved_crp() {
        let (_tmp, dir) = dir_with_setup(|_| {});
        assert!(find_unresolved_crp(&dir).unwrap().is_none());
    }

    #[test]
    fn crp_without_vcr_is_unresolved() {
        let (_tmp, dir) = dir_with_setup(|dir| {
            std::fs::write(
                dir.crp_file("crp-001"),
                r#"{"id":"crp-001","created_by":"refiner","created_at":"2026-07-27T00:00:00Z","type":"question","question":"auth method?","options":[],"status":"pending"}"#,
            )
            .unwrap();
        });
        assert_eq!(find_unresolved_crp(&dir).unwrap(), Some("crp-001".to_string()));
    }

    #[test]
    fn crp_with_matching_vcr_is_resolved() {
        let (_tmp, dir) = dir_with_setup(|dir| {
            std::fs::write(
                dir.crp_file("crp-001"),
                r#"{"id":"crp-001","created_by":"refiner","created_at":"2026-07-27T00:00:00Z","type":"question","question":"auth method?","options":[],"status":"pending"}"#,
            )
            .unwrap();
            std::fs::write(
                dir.vcr_file("vcr-001"),
                r#"{"id":"vcr-001","crp_id":"crp-001","decision":"JWT","rationale":null,"applies_to_future":false}"#,
            )
            .unwrap();
        });
        assert!(find_unresolved_crp(&dir).unwrap().is_none());
    }

    #[test]
    fn decide_transitions_when_no_crp_pending() {
        let (_tmp, dir) = dir_with_setup(|_| {});
        let action = AgentCoordinator::decide(&dir, RunPhase::Refine).unwrap();
        assert_eq!(
            action,
            CoordinatorAction::Transition {
                next_phase: RunPhase::Build,
                next_agent: Some(AgentName::Builder),
            }
        );
    }

    #[test]
    fn decide_waits_for_human_when_crp_pending() {
        let (_tmp, dir) = dir_with_setup(|dir| {
            std::fs::write(
                dir.crp_file("crp-001"),
                r#"{"id":"crp-001","created_by":"refiner","created_at":"2026-07-27T00:00:00Z","type":"question","question":"auth method?","options":[],"status":"pending"}"#,
            )
            .unwrap();
        });
        let action = AgentCoordinator::decide(&dir, RunPhase::Refine).unwrap();
        assert_eq!(action, CoordinatorAction::WaitForHuman { crp_id: "crp-001".into() });
    }
}
