//! Mission data model: Mission, Phase, Task (SPEC_FULL §3).
//!
//! Grounded in `council/mod.rs`'s delegation/decision bookkeeping shape
//! (named stages holding ordered sub-records) and the teacher's consistent
//! `{id, status, ...}` record style used throughout `state/types.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::planning::PlanningOutcome;
use crate::run::RunId;

pub type MissionId = String;
pub type PhaseId = String;
pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Planning,
    PlanReview,
    Ready,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    InProgress,
    Passed,
    Failed,
    Skipped,
    NeedsHuman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub phase_id: PhaseId,
    pub title: String,
    pub briefing_path: String,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    pub status: TaskStatus,
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub carry_forward: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub agent_config_override: Option<serde_json::Value>,
}

impl Task {
    /// A task is eligible only when every dependency is `passed`
    /// (SPEC_FULL §3).
    pub fn is_eligible(&self, completed_tasks: &std::collections::HashMap<TaskId, TaskStatus>) -> bool {
        self.depends_on
            .iter()
            .all(|dep| matches!(completed_tasks.get(dep), Some(TaskStatus::Passed)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub phase_id: PhaseId,
    pub number: u32,
    pub title: String,
    pub description: String,
    pub tasks: Vec<Task>,
    pub status: PhaseStatus,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionStats {
    pub tasks_total: u32,
    pub tasks_passed: u32,
    pub tasks_failed: u32,
    pub tasks_skipped: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: MissionId,
    pub description: String,
    #[serde(default)]
    pub planning_outcome: Option<PlanningOutcome>,
    pub phases: Vec<Phase>,
    pub status: MissionStatus,
    pub stats: MissionStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(mission_id: MissionId, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            mission_id,
            description: description.into(),
            planning_outcome: None,
            phases: Vec::new(),
            status: MissionStatus::Planning,
            stats: MissionStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self, number: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.number == number)
    }

    pub fn phase_mut(&mut self, number: u32) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.number == number)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
