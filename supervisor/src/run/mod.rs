//! Run data model, directory layout, and state persistence.

pub mod dir;
pub mod state;
pub mod types;

pub use dir::RunDirectory;
pub use state::{StateStore, StoreError};
pub use types::{
    is_valid_crp_id, is_valid_mission_id, is_valid_run_id, is_valid_vcr_id, new_mission_id,
    new_run_id, AgentName, AgentRecord, AgentStatus, ClarificationRequest, CrpId, CrpOption,
    CrpStatus, ErrorFlag, ErrorKind, HumanResolution, ModelTier, Run, RunId, RunPhase,
    SelectedModels, Usage, UsageTotals, Verdict, VerdictKind, VcrId,
};
