//! Top-level error type for the supervisor.
//!
//! Leaf modules define their own narrow error enums and convert into
//! [`SupervisorError`] via `#[from]`, mirroring the layering the teacher
//! crate uses between `StoreError` and its crate-level re-exports.

use std::path::PathBuf;
use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::phase::TransitionBlocked;
use crate::prompts::PromptError;
use crate::recovery::RecoveryError;
use crate::retry::RetryExhausted;
use crate::run::StoreError;
use crate::terminal::TerminalError;

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors that can occur while driving a run or mission.
///
/// Follows the taxonomy in SPEC_FULL.md §7: Validation / Filesystem /
/// State / Agent / Recovery / Timeout.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    State(#[from] StoreError),

    #[error("transition blocked: {0}")]
    TransitionBlocked(#[from] TransitionBlocked),

    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    RetryExhausted(#[from] RetryExhausted),

    #[error("agent error: {agent} {message}")]
    Agent { agent: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("run {0} failed: {1}")]
    RunFailed(String, String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl SupervisorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn agent(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Agent {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Whether this error is recoverable in place (retried) rather than
    /// terminal to the run. Matches the propagation policy in SPEC_FULL §7.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Agent { .. } | Self::Timeout(_) | Self::Terminal(_)
        )
    }
}
