//! RecoveryManager: strategy registry keyed by error kind (SPEC_FULL §4.8).
//!
//! Grounded in `escalation/engine.rs`'s `SuggestedAction` dispatch and the
//! Design Notes' explicit call to replace "subclasses for recovery
//! strategies" with "a small interface (two methods) plus a registry keyed
//! by name".

use std::collections::HashMap;

use thiserror::Error;

use crate::run::{AgentName, ErrorFlag, ErrorKind};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("no recovery strategy registered for error kind {0}")]
    NoStrategy(ErrorKind),

    #[error("strategy for {kind} failed: {message}")]
    StrategyFailed { kind: ErrorKind, message: String },
}

/// Outcome a strategy recommends once it has decided it can recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Restart,
    ExtendTimeout,
    Skip,
    Abort,
}

#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub action: RecoveryAction,
    pub message: String,
}

/// Context passed to a strategy: the error plus whatever the strategy needs
/// to decide (e.g. whether the agent is still producing output).
pub struct RecoveryContext<'a> {
    pub agent: AgentName,
    pub error: &'a ErrorFlag,
    pub still_producing_output: bool,
}

/// A recovery strategy. Implementations must be idempotent: RetryManager
/// may invoke `recover` repeatedly for the same context.
pub trait RecoveryStrategy: Send + Sync {
    fn can_recover(&self, error: &ErrorFlag) -> bool;
    fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome;
}

/// Clears the pane, marks the agent `running`, restarts with the same
/// prompt and model (SPEC_FULL §4.8).
pub struct CrashStrategy;

impl RecoveryStrategy for CrashStrategy {
    fn can_recover(&self, error: &ErrorFlag) -> bool {
        error.error_type == ErrorKind::Crash && error.recoverable
    }

    fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        RecoveryOutcome {
            success: true,
            action: RecoveryAction::Restart,
            message: format!("restarting {} after crash", ctx.agent),
        }
    }
}

/// If the pane is still producing output without an error marker, extend
/// the deadline; otherwise restart as for a crash.
pub struct TimeoutStrategy;

impl RecoveryStrategy for TimeoutStrategy {
    fn can_recover(&self, error: &ErrorFlag) -> bool {
        error.error_type == ErrorKind::Timeout && error.recoverable
    }

    fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        if ctx.still_producing_output {
            RecoveryOutcome {
                success: true,
                action: RecoveryAction::ExtendTimeout,
                message: format!("{} still producing output, extending deadline", ctx.agent),
            }
        } else {
            RecoveryOutcome {
                success: true,
                action: RecoveryAction::Restart,
                message: format!("restarting {} after stall", ctx.agent),
            }
        }
    }
}

/// Restart after clearing so the agent re-reads the sentinel error file and
/// corrects its output format.
pub struct ValidationStrategy;

impl RecoveryStrategy for ValidationStrategy {
    fn can_recover(&self, error: &ErrorFlag) -> bool {
        error.error_type == ErrorKind::Validation && error.recoverable
    }

    fn recover(&self, ctx: &RecoveryContext<'_>) -> RecoveryOutcome {
        RecoveryOutcome {
            success: true,
            action: RecoveryAction::Restart,
            message: format!("restarting {} to correct validation error", ctx.agent),
        }
    }
}

/// Registry of strategies, tried in registration order. Unknown
/// `error_type` (or no strategy claiming it) maps to `abort`.
pub struct RecoveryManager {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        let mut manager = Self { strategies: Vec::new() };
        manager.register(Box::new(CrashStrategy));
        manager.register(Box::new(TimeoutStrategy));
        manager.register(Box::new(ValidationStrategy));
        manager
    }
}

impl RecoveryManager {
    pub fn empty() -> Self {
        Self { strategies: Vec::new() }
    }

    pub fn register(&mut self, strategy: Box<dyn RecoveryStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn recover(&self, ctx: &RecoveryContext<'_>) -> Result<RecoveryOutcome, RecoveryError> {
        match self.strategies.iter().find(|s| s.can_recover(ctx.error)) {
            Some(strategy) => Ok(strategy.recover(ctx)),
            None => Ok(RecoveryOutcome {
                success: false,
                action: RecoveryAction::Abort,
                message: format!("no strategy for error type {}", ctx.error.error_type),
            }),
        }
    }
}

/// Per-run, in-memory history of recovery attempts (SPEC_FULL §4.13).
#[derive(Debug, Clone)]
pub struct RecoveryHistoryEntry {
    pub agent: AgentName,
    pub error_type: ErrorKind,
    pub outcome: Option<RecoveryAction>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct RecoveryHistory {
    entries: Vec<RecoveryHistoryEntry>,
}

impl RecoveryHistory {
    pub fn record(&mut self, entry: RecoveryHistoryEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[RecoveryHistoryEntry] {
        &self.entries
    }
}

/// Table of which error kinds are configured as auto-retryable
/// (ErrorRecoveryService's `recoverable list`, SPEC_FULL §4.13).
#[derive(Debug, Clone)]
pub struct RecoverablePolicy {
    kinds: HashMap<ErrorKind, bool>,
}

impl Default for RecoverablePolicy {
    fn default() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(ErrorKind::Crash, true);
        kinds.insert(ErrorKind::Timeout, true);
        kinds.insert(ErrorKind::Validation, true);
        kinds.insert(ErrorKind::Permission, false);
        kinds.insert(ErrorKind::Resource, false);
        kinds.insert(ErrorKind::Other, false);
        Self { kinds }
    }
}

impl RecoverablePolicy {
    pub fn is_auto_retryable(&self, kind: ErrorKind) -> bool {
        *self.kinds.get(&kind).unwrap_or(&false)
    }
}
