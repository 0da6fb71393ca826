//! Mission planning: Planner↔Critic iteration loop.

pub mod pipeline;
pub mod process_agent;
pub mod types;

pub use pipeline::{CriticAgent, PlannerAgent, PlanningConfig, PlanningError, PlanningOutcome, PlanningPipeline};
pub use process_agent::{ProcessCriticAgent, ProcessPlannerAgent};
pub use types::{Critique, CritiqueItem, CritiqueStats, CritiqueTarget, CritiqueVerdict, PlanDraft, Severity};
