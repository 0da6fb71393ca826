//! MissionManager: per-mission lifecycle, create → plan → approved phases
//! → sequential task Runs with context carry-forward (SPEC_FULL §4.16).
//!
//! Grounded in `council/mod.rs`'s delegation/decision bookkeeping and
//! `work_packet/generator.rs`'s context-assembly helpers (composing a
//! Phase Context from prior artefacts before handing work onward).

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use crate::planning::{CriticAgent, PlannerAgent, PlanningConfig, PlanningOutcome, PlanningPipeline};
use crate::run::dir::atomic_write;
use crate::run::{new_mission_id, RunId, VerdictKind};

use super::types::{Mission, MissionId, MissionStats, MissionStatus, Phase, PhaseStatus, Task, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("mission {0} not found")]
    NotFound(MissionId),

    #[error("phase {0} not found")]
    PhaseNotFound(u32),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("approvePlan is only valid when planning is needs_human (mission {0})")]
    NotAwaitingApproval(MissionId),

    #[error("phase {0} requires the previous phase to be completed first")]
    PreviousPhaseNotCompleted(u32),
}

/// Outcome of spawning and awaiting one task's child Run, supplied by
/// whatever drives the Orchestrator for that run (kept as a narrow trait so
/// `mission` does not depend on `orchestrator`, avoiding a module cycle —
/// `orchestrator.rs` is the caller that implements this).
pub trait RunSpawner {
    /// Start a child run for `briefing` (with any `previous_context`
    /// prepended) and block until its Gatekeeper verdict is available,
    /// returning the run id and verdict.
    fn spawn_and_await(
        &mut self,
        briefing: &str,
        previous_context: Option<&str>,
    ) -> Result<(RunId, VerdictKind), String>;
}

fn verdict_to_task_status(verdict: VerdictKind) -> TaskStatus {
    match verdict {
        VerdictKind::Pass => TaskStatus::Passed,
        VerdictKind::NeedsHuman => TaskStatus::NeedsHuman,
        VerdictKind::MinorFail | VerdictKind::Fail => TaskStatus::Failed,
    }
}

pub struct MissionManager {
    missions_root: PathBuf,
    planning_config: PlanningConfig,
}

impl MissionManager {
    pub fn new(missions_root: impl Into<PathBuf>, planning_config: PlanningConfig) -> Self {
        Self {
            missions_root: missions_root.into(),
            planning_config,
        }
    }

    fn mission_dir(&self, mission_id: &MissionId) -> PathBuf {
        self.missions_root.join(mission_id)
    }

    fn mission_json_path(&self, mission_id: &MissionId) -> PathBuf {
        self.mission_dir(mission_id).join("mission.json")
    }

    fn kanban_path(&self, mission_id: &MissionId) -> PathBuf {
        self.mission_dir(mission_id).join("kanban.json")
    }

    fn load(&self, mission_id: &MissionId) -> Result<Mission, MissionError> {
        let bytes = std::fs::read(self.mission_json_path(mission_id))
            .map_err(|_| MissionError::NotFound(mission_id.clone()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, mission: &mut Mission) -> Result<(), MissionError> {
        mission.touch();
        let bytes = serde_json::to_vec_pretty(mission)?;
        atomic_write(self.mission_json_path(&mission.mission_id), &bytes)?;
        self.write_kanban(mission);
        Ok(())
    }

    /// Update failures here log but never abort execution (SPEC_FULL §4.16).
    fn write_kanban(&self, mission: &Mission) {
        let kanban: Vec<_> = mission
            .phases
            .iter()
            .flat_map(|phase| phase.tasks.iter().map(move |task| (task.task_id.clone(), task.status)))
            .collect();
        match serde_json::to_vec_pretty(&kanban) {
            Ok(bytes) => {
                if let Err(e) = atomic_write(self.kanban_path(&mission.mission_id), &bytes) {
                    warn!(mission_id = %mission.mission_id, error = %e, "failed to update kanban mirror");
                }
            }
            Err(e) => warn!(mission_id = %mission.mission_id, error = %e, "failed to serialize kanban mirror"),
        }
    }

    /// Allocate missionId, create `missions/<id>/`, persist input, run
    /// PlanningPipeline, materialise phases/tasks on approval (SPEC_FULL
    /// §4.16).
    pub fn create_mission(
        &self,
        description: &str,
        planner: &mut dyn PlannerAgent,
        critic: &mut dyn CriticAgent,
        materialize_phases: impl FnOnce(&serde_json::Value) -> Vec<Phase>,
    ) -> Result<Mission, MissionError> {
        let mission_id = new_mission_id(Utc::now());
        let dir = self.mission_dir(&mission_id);
        std::fs::create_dir_all(dir.join("planning"))?;
        std::fs::create_dir_all(dir.join("phases"))?;
        std::fs::create_dir_all(dir.join("context"))?;
        atomic_write(dir.join("input.md"), description.as_bytes())?;

        let mut mission = Mission::new(mission_id.clone(), description);
        self.save(&mut mission)?;

        let pipeline = PlanningPipeline::new(dir.join("planning"), self.planning_config);
        let outcome = pipeline
            .run(description, planner, critic)
            .map_err(|e| MissionError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        match &outcome {
            PlanningOutcome::Approved { .. } => {
                let final_bytes = std::fs::read(dir.join("planning").join("final.json"))?;
                let final_plan: serde_json::Value = serde_json::from_slice(&final_bytes)?;
                mission.phases = materialize_phases(&final_plan);
                mission.stats = recompute_stats(&mission.phases);
                mission.status = MissionStatus::Ready;
            }
            PlanningOutcome::NeedsHuman { .. } => {
                mission.status = MissionStatus::PlanReview;
            }
        }
        mission.planning_outcome = Some(outcome);
        self.save(&mut mission)?;
        Ok(mission)
    }

    /// Only valid when planning stage is `needs_human`; promotes to
    /// `ready`.
    pub fn approve_plan(&self, mission_id: &MissionId) -> Result<Mission, MissionError> {
        let mut mission = self.load(mission_id)?;
        if mission.status != MissionStatus::PlanReview {
            return Err(MissionError::NotAwaitingApproval(mission_id.clone()));
        }
        mission.status = MissionStatus::Ready;
        self.save(&mut mission)?;
        Ok(mission)
    }

    /// Requires the previous phase to be `completed`. Iterates tasks in
    /// order, starting a child Run per eligible task via `spawner`,
    /// stopping on first failure unless `continue_on_failure` (SPEC_FULL
    /// §4.16).
    pub fn run_phase(
        &self,
        mission_id: &MissionId,
        phase_number: u32,
        continue_on_failure: bool,
        spawner: &mut dyn RunSpawner,
    ) -> Result<Mission, MissionError> {
        let mut mission = self.load(mission_id)?;

        if phase_number > 1 {
            let previous = mission
                .phase(phase_number - 1)
                .ok_or(MissionError::PhaseNotFound(phase_number - 1))?;
            if previous.status != PhaseStatus::Completed {
                return Err(MissionError::PreviousPhaseNotCompleted(phase_number));
            }
        }

        let previous_context = self.read_phase_summary(mission_id, phase_number.saturating_sub(1))?;

        let mut completed: std::collections::HashMap<TaskId, TaskStatus> = std::collections::HashMap::new();
        for phase in &mission.phases {
            for task in &phase.tasks {
                completed.insert(task.task_id.clone(), task.status);
            }
        }

        mission
            .phase_mut(phase_number)
            .ok_or(MissionError::PhaseNotFound(phase_number))?
            .status = PhaseStatus::InProgress;
        self.save(&mut mission)?;

        let task_ids: Vec<TaskId> = mission
            .phase(phase_number)
            .ok_or(MissionError::PhaseNotFound(phase_number))?
            .tasks
            .iter()
            .map(|t| t.task_id.clone())
            .collect();

        let mut any_failed = false;
        for task_id in task_ids {
            let eligible = {
                let phase = mission.phase(phase_number).ok_or(MissionError::PhaseNotFound(phase_number))?;
                let task = phase
                    .tasks
                    .iter()
                    .find(|t| t.task_id == task_id)
                    .ok_or_else(|| MissionError::TaskNotFound(task_id.clone()))?;
                task.is_eligible(&completed)
            };

            if !eligible {
                self.set_task_status(&mut mission, phase_number, &task_id, TaskStatus::Blocked, None)?;
                continue;
            }

            if any_failed && !continue_on_failure {
                continue;
            }

            let briefing_path = {
                let phase = mission.phase(phase_number).unwrap();
                let task = phase.tasks.iter().find(|t| t.task_id == task_id).unwrap();
                task.briefing_path.clone()
            };
            let briefing = std::fs::read_to_string(&briefing_path).unwrap_or_default();

            self.set_task_status(&mut mission, phase_number, &task_id, TaskStatus::InProgress, None)?;

            match spawner.spawn_and_await(&briefing, previous_context.as_deref()) {
                Ok((run_id, verdict)) => {
                    let status = verdict_to_task_status(verdict);
                    completed.insert(task_id.clone(), status);
                    self.attach_run(&mut mission, phase_number, &task_id, run_id)?;
                    self.set_task_status(&mut mission, phase_number, &task_id, status, None)?;
                    if status != TaskStatus::Passed {
                        any_failed = true;
                    }
                }
                Err(message) => {
                    any_failed = true;
                    completed.insert(task_id.clone(), TaskStatus::Failed);
                    self.set_task_status(&mut mission, phase_number, &task_id, TaskStatus::Failed, Some(message))?;
                }
            }
        }

        let phase_failed = any_failed && !continue_on_failure;
        let phase_status = if phase_failed { PhaseStatus::Failed } else { PhaseStatus::Completed };
        mission.phase_mut(phase_number).unwrap().status = phase_status;

        if phase_status == PhaseStatus::Completed {
            let summary = self.compose_phase_context(&mission, phase_number);
            let path = self.mission_dir(mission_id).join("context").join(format!("phase-{phase_number}-summary.md"));
            atomic_write(path, summary.as_bytes())?;
            mission.phase_mut(phase_number).unwrap().summary = Some(summary);
        }

        mission.stats = recompute_stats(&mission.phases);
        if mission.phases.iter().all(|p| p.status == PhaseStatus::Completed) {
            mission.status = MissionStatus::Completed;
        } else if phase_failed {
            mission.status = MissionStatus::Failed;
        }
        self.save(&mut mission)?;
        Ok(mission)
    }

    /// Single-task variant of `run_phase` with the same dependency checks.
    pub fn run_task(
        &self,
        mission_id: &MissionId,
        task_id: &TaskId,
        spawner: &mut dyn RunSpawner,
    ) -> Result<Mission, MissionError> {
        let mission = self.load(mission_id)?;
        let phase_number = mission
            .phases
            .iter()
            .find(|p| p.tasks.iter().any(|t| &t.task_id == task_id))
            .map(|p| p.number)
            .ok_or_else(|| MissionError::TaskNotFound(task_id.clone()))?;
        self.run_phase(mission_id, phase_number, true, spawner)
    }

    pub fn retry_task(&self, mission_id: &MissionId, task_id: &TaskId) -> Result<Mission, MissionError> {
        let mut mission = self.load(mission_id)?;
        let phase_number = mission
            .phases
            .iter()
            .find(|p| p.tasks.iter().any(|t| &t.task_id == task_id))
            .map(|p| p.number)
            .ok_or_else(|| MissionError::TaskNotFound(task_id.clone()))?;
        self.set_task_status(&mut mission, phase_number, task_id, TaskStatus::Pending, None)?;
        Ok(mission)
    }

    pub fn skip_task(&self, mission_id: &MissionId, task_id: &TaskId) -> Result<Mission, MissionError> {
        let mut mission = self.load(mission_id)?;
        let phase_number = mission
            .phases
            .iter()
            .find(|p| p.tasks.iter().any(|t| &t.task_id == task_id))
            .map(|p| p.number)
            .ok_or_else(|| MissionError::TaskNotFound(task_id.clone()))?;
        self.set_task_status(&mut mission, phase_number, task_id, TaskStatus::Skipped, None)?;
        Ok(mission)
    }

    pub fn delete_mission(&self, mission_id: &MissionId) -> Result<(), MissionError> {
        let dir = self.mission_dir(mission_id);
        if dir.is_dir() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn status(&self, mission_id: &MissionId) -> Result<Mission, MissionError> {
        self.load(mission_id)
    }

    pub fn list(&self) -> Result<Vec<MissionId>, MissionError> {
        let mut ids = Vec::new();
        let entries = match std::fs::read_dir(&self.missions_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn set_task_status(
        &self,
        mission: &mut Mission,
        phase_number: u32,
        task_id: &TaskId,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<(), MissionError> {
        let phase = mission.phase_mut(phase_number).ok_or(MissionError::PhaseNotFound(phase_number))?;
        let task = phase
            .tasks
            .iter_mut()
            .find(|t| &t.task_id == task_id)
            .ok_or_else(|| MissionError::TaskNotFound(task_id.clone()))?;
        task.status = status;
        if error.is_some() {
            task.error = error;
        }
        self.save(mission)
    }

    fn attach_run(
        &self,
        mission: &mut Mission,
        phase_number: u32,
        task_id: &TaskId,
        run_id: RunId,
    ) -> Result<(), MissionError> {
        let phase = mission.phase_mut(phase_number).ok_or(MissionError::PhaseNotFound(phase_number))?;
        let task = phase
            .tasks
            .iter_mut()
            .find(|t| &t.task_id == task_id)
            .ok_or_else(|| MissionError::TaskNotFound(task_id.clone()))?;
        task.run_id = Some(run_id);
        Ok(())
    }

    fn read_phase_summary(&self, mission_id: &MissionId, phase_number: u32) -> Result<Option<String>, MissionError> {
        if phase_number == 0 {
            return Ok(None);
        }
        let path = self
            .mission_dir(mission_id)
            .join("context")
            .join(format!("phase-{phase_number}-summary.md"));
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Compose a Phase Context from every passed task's artefacts
    /// (SPEC_FULL §4.16: "all passed-task artefacts, API contracts,
    /// warnings, decisions").
    fn compose_phase_context(&self, mission: &Mission, phase_number: u32) -> String {
        let phase = mission.phase(phase_number).expect("phase exists");
        let mut summary = format!("# Phase {phase_number}: {}\n\n", phase.title);
        for task in &phase.tasks {
            summary.push_str(&format!("## {} ({:?})\n", task.title, task.status));
            if let Some(carry_forward) = &task.carry_forward {
                summary.push_str(&format!("{carry_forward}\n"));
            }
        }
        summary
    }
}

fn recompute_stats(phases: &[Phase]) -> MissionStats {
    let mut stats = MissionStats::default();
    for phase in phases {
        for task in &phase.tasks {
            stats.tasks_total += 1;
            match task.status {
                TaskStatus::Passed => stats.tasks_passed += 1,
                TaskStatus::Failed => stats.tasks_failed += 1,
                TaskStatus::Skipped => stats.tasks_skipped += 1,
                _ => {}
            }
        }
    }
    stats
}
