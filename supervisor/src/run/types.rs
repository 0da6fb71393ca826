//! Core data model: Run, AgentStatus, ErrorFlag, CRP/VCR, Verdict.
//!
//! Grounded in the teacher's `state/types.rs` shape (plain serde structs,
//! `*Id` type aliases, `new()` constructors that stamp timestamps) but
//! rewritten against the file-backed layout SPEC_FULL §6 mandates instead
//! of RocksDB keys.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub type RunId = String;
pub type CrpId = String;
pub type VcrId = String;

static RUN_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^run-\d{14}$").unwrap());
static CRP_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^crp-[A-Za-z0-9_-]{1,64}$").unwrap());
static VCR_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^vcr-[A-Za-z0-9_-]{1,64}$").unwrap());
static MISSION_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^mission-\d{14}$").unwrap());

/// Validate a run id against `^run-\d{14}$` (SPEC_FULL §6).
pub fn is_valid_run_id(id: &str) -> bool {
    RUN_ID_PATTERN.is_match(id)
}

/// Validate a CRP/VCR-style id: `crp-` or `vcr-` followed by up to 64
/// `[A-Za-z0-9_-]` characters.
pub fn is_valid_crp_id(id: &str) -> bool {
    CRP_ID_PATTERN.is_match(id)
}

pub fn is_valid_vcr_id(id: &str) -> bool {
    VCR_ID_PATTERN.is_match(id)
}

pub fn is_valid_mission_id(id: &str) -> bool {
    MISSION_ID_PATTERN.is_match(id)
}

/// Allocate a new run id from the current instant, monotonic per second.
///
/// Callers that create many runs within the same wall-clock second should
/// retry `now` on collision with an existing directory; the supervisor's
/// `Orchestrator::start_run` does so (see orchestrator.rs).
pub fn new_run_id(now: DateTime<Utc>) -> RunId {
    format!("run-{}", now.format("%Y%m%d%H%M%S"))
}

pub fn new_mission_id(now: DateTime<Utc>) -> String {
    format!("mission-{}", now.format("%Y%m%d%H%M%S"))
}

/// The four pipeline agents, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentName {
    Refiner,
    Builder,
    Verifier,
    Gatekeeper,
}

impl AgentName {
    pub const ALL: [AgentName; 4] = [
        AgentName::Refiner,
        AgentName::Builder,
        AgentName::Verifier,
        AgentName::Gatekeeper,
    ];

    /// The agent that owns a given run phase, if any (phases `waiting_human`,
    /// `ready_for_merge`, `completed`, `failed` own no agent).
    pub fn for_phase(phase: RunPhase) -> Option<AgentName> {
        match phase {
            RunPhase::Refine => Some(AgentName::Refiner),
            RunPhase::Build => Some(AgentName::Builder),
            RunPhase::Verify => Some(AgentName::Verifier),
            RunPhase::Gate => Some(AgentName::Gatekeeper),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentName::Refiner => "refiner",
            AgentName::Builder => "builder",
            AgentName::Verifier => "verifier",
            AgentName::Gatekeeper => "gatekeeper",
        }
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run phase, per SPEC_FULL §3/§4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Refine,
    Build,
    Verify,
    Gate,
    WaitingHuman,
    ReadyForMerge,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunPhase::Refine => "refine",
            RunPhase::Build => "build",
            RunPhase::Verify => "verify",
            RunPhase::Gate => "gate",
            RunPhase::WaitingHuman => "waiting_human",
            RunPhase::ReadyForMerge => "ready_for_merge",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Status of a single agent sub-record within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    WaitingTestExecution,
    WaitingHuman,
    Completed,
    Failed,
    Timeout,
}

/// Coarse model-capability band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Low,
    Mid,
    High,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelTier::Low => "low",
            ModelTier::Mid => "mid",
            ModelTier::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Per-agent token/cost accumulation (SPEC_FULL §4.6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Kinds of error a sentinel `error.flag` can report (SPEC_FULL §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Crash,
    Timeout,
    Validation,
    Permission,
    Resource,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Crash => "crash",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Permission => "permission",
            ErrorKind::Resource => "resource",
            ErrorKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Contents of a per-agent `error.flag` sentinel file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFlag {
    pub agent: AgentName,
    pub error_type: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
}

impl ErrorFlag {
    pub fn new(
        agent: AgentName,
        error_type: ErrorKind,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self {
            agent,
            error_type,
            message: message.into(),
            timestamp: Utc::now(),
            recoverable,
        }
    }
}

/// A risk-annotated option offered to the human in a CRP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrpOption {
    pub id: String,
    pub label: String,
    pub risk: Option<String>,
}

/// Status of a clarification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrpStatus {
    Pending,
    Resolved,
}

/// Clarification Request Pack, authored by any agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub id: CrpId,
    pub created_by: AgentName,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<CrpOption>,
    #[serde(default)]
    pub recommendation: Option<String>,
    pub status: CrpStatus,
}

impl ClarificationRequest {
    pub fn new(id: CrpId, created_by: AgentName, kind: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id,
            created_by,
            created_at: Utc::now(),
            kind: kind.into(),
            question: question.into(),
            options: Vec::new(),
            recommendation: None,
            status: CrpStatus::Pending,
        }
    }
}

/// Human Resolution recorded against a CRP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanResolution {
    pub id: VcrId,
    pub crp_id: CrpId,
    pub decision: String,
    pub rationale: Option<String>,
    #[serde(default)]
    pub applies_to_future: bool,
}

/// Gatekeeper verdict classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Pass,
    MinorFail,
    Fail,
    NeedsHuman,
}

/// `verdict.json` contents, written by the Gatekeeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub reason: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub carry_forward: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// A single agent's sub-record within `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub status: AgentStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<ErrorFlag>,
    #[serde(default)]
    pub usage: Usage,
}

impl Default for AgentRecord {
    fn default() -> Self {
        Self {
            status: AgentStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            usage: Usage::default(),
        }
    }
}

/// Totals carried in `state.json.usage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_cost_usd: f64,
}

/// Per-agent selected model tier map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedModels {
    pub refiner: ModelTier,
    pub builder: ModelTier,
    pub verifier: ModelTier,
    pub gatekeeper: ModelTier,
}

impl Default for ModelTier {
    fn default() -> Self {
        ModelTier::Mid
    }
}

impl SelectedModels {
    pub fn get(&self, agent: AgentName) -> ModelTier {
        match agent {
            AgentName::Refiner => self.refiner,
            AgentName::Builder => self.builder,
            AgentName::Verifier => self.verifier,
            AgentName::Gatekeeper => self.gatekeeper,
        }
    }

    pub fn set(&mut self, agent: AgentName, tier: ModelTier) {
        match agent {
            AgentName::Refiner => self.refiner = tier,
            AgentName::Builder => self.builder = tier,
            AgentName::Verifier => self.verifier = tier,
            AgentName::Gatekeeper => self.gatekeeper = tier,
        }
    }
}

/// `state.json` contents: the single source of truth for a run
/// (SPEC_FULL §4.1, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    #[serde(default)]
    pub schema_version: u32,
    pub phase: RunPhase,
    pub iteration: u32,
    pub max_iterations: u32,
    #[serde(default)]
    pub minor_fix_attempts: u32,
    pub refiner: AgentRecord,
    pub builder: AgentRecord,
    pub verifier: AgentRecord,
    pub gatekeeper: AgentRecord,
    #[serde(default)]
    pub pending_crp: Option<CrpId>,
    /// Phase the run was driving when it entered `waiting_human`, so a
    /// separate `recover` invocation knows where to resume (the process
    /// that paused may not be the process that resumes).
    #[serde(default)]
    pub paused_from: Option<RunPhase>,
    #[serde(default)]
    pub selected_models: SelectedModels,
    #[serde(default)]
    pub usage: UsageTotals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(run_id: RunId, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            schema_version: 1,
            phase: RunPhase::Refine,
            iteration: 1,
            max_iterations,
            minor_fix_attempts: 0,
            refiner: AgentRecord::default(),
            builder: AgentRecord::default(),
            verifier: AgentRecord::default(),
            gatekeeper: AgentRecord::default(),
            pending_crp: None,
            paused_from: None,
            selected_models: SelectedModels::default(),
            usage: UsageTotals::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn agent(&self, agent: AgentName) -> &AgentRecord {
        match agent {
            AgentName::Refiner => &self.refiner,
            AgentName::Builder => &self.builder,
            AgentName::Verifier => &self.verifier,
            AgentName::Gatekeeper => &self.gatekeeper,
        }
    }

    pub fn agent_mut(&mut self, agent: AgentName) -> &mut AgentRecord {
        match agent {
            AgentName::Refiner => &mut self.refiner,
            AgentName::Builder => &mut self.builder,
            AgentName::Verifier => &mut self.verifier,
            AgentName::Gatekeeper => &mut self.gatekeeper,
        }
    }

    /// Invariant 1 (SPEC_FULL §8): at most one agent `running` outside
    /// terminal phases.
    pub fn running_agents(&self) -> Vec<AgentName> {
        AgentName::ALL
            .into_iter()
            .filter(|a| self.agent(*a).status == AgentStatus::Running)
            .collect()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_pattern() {
        assert!(is_valid_run_id("run-20260727120000"));
        assert!(!is_valid_run_id("run-2026072712000")); // 13 digits
        assert!(!is_valid_run_id("run-2026072712000a"));
        assert!(!is_valid_run_id("mission-20260727120000"));
    }

    #[test]
    fn crp_vcr_id_patterns() {
        assert!(is_valid_crp_id("crp-001"));
        assert!(is_valid_crp_id("crp-a_b-C9"));
        assert!(!is_valid_crp_id("crp-"));
        assert!(!is_valid_crp_id(&format!("crp-{}", "a".repeat(65))));
        assert!(is_valid_vcr_id("vcr-001"));
        assert!(!is_valid_vcr_id("crp-001"));
    }

    #[test]
    fn new_run_id_is_well_formed() {
        let now = Utc::now();
        let id = new_run_id(now);
        assert!(is_valid_run_id(&id));
    }

    #[test]
    fn single_running_agent_invariant_holds_on_fresh_run() {
        let run = Run::new(new_run_id(Utc::now()), 3);
        assert!(run.running_agents().is_empty());
    }

    #[test]
    fn for_phase_maps_pipeline_phases_only() {
        assert_eq!(AgentName::for_phase(RunPhase::Refine), Some(AgentName::Refiner));
        assert_eq!(AgentName::for_phase(RunPhase::WaitingHuman), None);
        assert_eq!(AgentName::for_phase(RunPhase::Completed), None);
    }
}
