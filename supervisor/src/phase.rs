//! PhaseMachine: validates and executes run-phase transitions, and maps
//! Gatekeeper verdicts to the next phase.
//!
//! Grounded in `state_machine.rs::OrchestratorState`/`is_legal_transition`
//! (the `swarm-agents` member, since trimmed — see DESIGN.md) adapted
//! one-for-one to the eight phases in SPEC_FULL §4.10's transition table.

use thiserror::Error;

use crate::run::{RunPhase, VerdictKind};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("transition blocked: {from} -> {to} is not a legal phase transition")]
pub struct TransitionBlocked {
    pub from: RunPhase,
    pub to: RunPhase,
}

/// Outcome of routing a Gatekeeper verdict from `gate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictRoute {
    /// Move to the given phase.
    Transition(RunPhase),
    /// Apply the Gatekeeper's own minor fix and stay effectively at
    /// `verify`, without incrementing iteration.
    MinorFixAtVerify,
}

/// Whether `(from, to)` appears in SPEC_FULL §4.10's transition table.
pub fn is_legal_transition(from: RunPhase, to: RunPhase) -> bool {
    use RunPhase::*;
    matches!(
        (from, to),
        (Refine, Build)
            | (Refine, WaitingHuman)
            | (Build, Verify)
            | (Build, WaitingHuman)
            | (Verify, Gate)
            | (Verify, WaitingHuman)
            | (Gate, ReadyForMerge)
            | (Gate, Build)
            | (Gate, Verify)
            | (Gate, WaitingHuman)
            | (Gate, Failed)
            | (WaitingHuman, Refine)
            | (WaitingHuman, Build)
            | (WaitingHuman, Verify)
            | (WaitingHuman, Gate)
            | (ReadyForMerge, Completed)
    )
}

/// A recorded transition, kept in the run's in-memory event history (not
/// persisted beyond `events.log`, per SPEC_FULL §9's "mutable shared state
/// in memory" note — `state.json` alone is the durable source of truth).
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: RunPhase,
    pub to: RunPhase,
    pub iteration: u32,
}

/// Stateless validator plus the verdict-routing rules. Holds no run state
/// itself; callers pass the current `Run` snapshot in.
#[derive(Debug, Default)]
pub struct PhaseMachine;

impl PhaseMachine {
    pub fn new() -> Self {
        Self
    }

    /// Validate and describe a bare phase transition (used outside verdict
    /// routing, e.g. `waiting_human` resumption). Returns
    /// `TransitionBlocked` without mutating anything if illegal.
    pub fn validate(&self, from: RunPhase, to: RunPhase) -> Result<(), TransitionBlocked> {
        if is_legal_transition(from, to) {
            Ok(())
        } else {
            Err(TransitionBlocked { from, to })
        }
    }

    /// Route a Gatekeeper verdict received while in `gate`, per SPEC_FULL
    /// §4.10's verdict table. `minor_fix_attempts` / `max_minor_fix_attempts`
    /// gate the `MINOR_FAIL` fall-back; `iteration` / `max_iterations` gate
    /// the `FAIL` fall-back.
    pub fn route_verdict(
        &self,
        verdict: VerdictKind,
        iteration: u32,
        max_iterations: u32,
        minor_fix_attempts: u32,
        max_minor_fix_attempts: u32,
    ) -> VerdictRoute {
        match verdict {
            VerdictKind::Pass => VerdictRoute::Transition(RunPhase::ReadyForMerge),
            VerdictKind::NeedsHuman => VerdictRoute::Transition(RunPhase::WaitingHuman),
            VerdictKind::MinorFail => {
                if minor_fix_attempts < max_minor_fix_attempts {
                    VerdictRoute::MinorFixAtVerify
                } else if iteration < max_iterations {
                    VerdictRoute::Transition(RunPhase::Build)
                } else {
                    VerdictRoute::Transition(RunPhase::Failed)
                }
            }
            VerdictKind::Fail => {
                if iteration < max_iterations {
                    VerdictRoute::Transition(RunPhase::Build)
                } else {
                    VerdictRoute::Transition(RunPhase::Failed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RunPhase::*;

    #[test]
    fn every_table_row_is_legal() {
        let rows = [
            (Refine, Build),
            (Refine, WaitingHuman),
            (Build, Verify),
            (Build, WaitingHuman),
            (Verify, Gate),
            (Verify, WaitingHuman),
            (Gate, ReadyForMerge),
            (Gate, Build),
            (Gate, Verify),
            (Gate, WaitingHuman),
            (Gate, Failed),
            (WaitingHuman, Refine),
            (WaitingHuman, Build),
            (WaitingHuman, Verify),
            (WaitingHuman, Gate),
            (ReadyForMerge, Completed),
        ];
        for (from, to) in rows {
            assert!(is_legal_transition(from, to), "{from} -> {to} should be legal");
        }
    }

    #[test]
    fn terminal_phases_have_no_outgoing_transitions() {
        for to in [Refine, Build, Verify, Gate, WaitingHuman, ReadyForMerge, Completed, Failed] {
            assert!(!is_legal_transition(Completed, to));
            assert!(!is_legal_transition(Failed, to));
        }
    }

    #[test]
    fn unlisted_pair_is_rejected_without_mutation() {
        let machine = PhaseMachine::new();
        let err = machine.validate(Refine, Gate).unwrap_err();
        assert_eq!(err.from, Refine);
        assert_eq!(err.to, Gate);
    }

    #[test]
    fn pass_routes_to_ready_for_merge() {
        let machine = PhaseMachine::new();
        assert_eq!(
            machine.route_verdict(VerdictKind::Pass, 1, 3, 0, 1),
            VerdictRoute::Transition(ReadyForMerge)
        );
    }

    #[test]
    fn fail_routes_to_build_while_budget_remains_else_failed() {
        let machine = PhaseMachine::new();
        assert_eq!(
            machine.route_verdict(VerdictKind::Fail, 1, 3, 0, 1),
            VerdictRoute::Transition(Build)
        );
        assert_eq!(
            machine.route_verdict(VerdictKind::Fail, 3, 3, 0, 1),
            VerdictRoute::Transition(Failed)
        );
    }

    #[test]
    fn minor_fail_applies_fix_at_verify_until_budget_exhausted() {
        let machine = PhaseMachine::new();
        assert_eq!(
            machine.route_verdict(VerdictKind::MinorFail, 1, 3, 0, 1),
            VerdictRoute::MinorFixAtVerify
        );
        assert_eq!(
            machine.route_verdict(VerdictKind::MinorFail, 1, 3, 1, 1),
            VerdictRoute::Transition(Build)
        );
        assert_eq!(
            machine.route_verdict(VerdictKind::MinorFail, 3, 3, 1, 1),
            VerdictRoute::Transition(Failed)
        );
    }

    #[test]
    fn needs_human_routes_to_waiting_human() {
        let machine = PhaseMachine::new();
        assert_eq!(
            machine.route_verdict(VerdictKind::NeedsHuman, 1, 3, 0, 1),
            VerdictRoute::Transition(WaitingHuman)
        );
    }
}
