//! ErrorRecoveryService: routes error flags through RecoveryManager wrapped
//! by RetryManager (SPEC_FULL §4.13).
//!
//! Grounded in `feedback/correction_loop.rs`'s tiered escalation trigger
//! and its cause-chain preservation on exhaustion.

use crate::recovery::{RecoverablePolicy, RecoveryAction, RecoveryContext, RecoveryHistory, RecoveryHistoryEntry, RecoveryManager};
use crate::retry::{BackoffConfig, RetryKey, RetryManager};
use crate::run::{AgentName, ErrorFlag};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorOutcome {
    Recovered { action: RecoveryAction },
    Skipped { reason: String },
    Aborted { cause: String },
}

pub struct ErrorRecoveryService {
    retry: RetryManager,
    recovery: RecoveryManager,
    policy: RecoverablePolicy,
    history: RecoveryHistory,
    auto_retry_enabled: bool,
}

impl ErrorRecoveryService {
    pub fn new(backoff: BackoffConfig, auto_retry_enabled: bool) -> Self {
        Self {
            retry: RetryManager::new(backoff),
            recovery: RecoveryManager::default(),
            policy: RecoverablePolicy::default(),
            history: RecoveryHistory::default(),
            auto_retry_enabled,
        }
    }

    pub fn history(&self) -> &[RecoveryHistoryEntry] {
        self.history.entries()
    }

    /// Reset this agent's attempt counters across every error type, e.g.
    /// once it completes a phase successfully (SPEC_FULL §4.7: attempt
    /// counters "can be reset externally").
    pub fn reset_agent(&mut self, agent: AgentName) {
        self.retry.reset_agent(agent);
    }

    /// Handle `error` for `agent` in `run_id`. `still_producing_output` is
    /// sampled by the caller from the latest pane capture, used by the
    /// Timeout strategy.
    ///
    /// Each call accounts for one *occurrence* of `(agent, error_type)`
    /// rather than blocking on a synchronous retry loop: the strategy's
    /// decision (restart / extend timeout / skip) always resolves
    /// immediately, so what SPEC_FULL §4.7 calls a "retry" is really the
    /// next independently-detected error for the same key, sometime after
    /// this recovery attempt was issued. [`RetryManager::record_occurrence`]
    /// is what gives that a persistent, exhaustible budget across calls.
    pub async fn handle(
        &mut self,
        run_id: &str,
        agent: AgentName,
        error: &ErrorFlag,
        still_producing_output: bool,
    ) -> ErrorOutcome {
        if !self.auto_retry_enabled {
            return self.skip(agent, error, "auto-retry disabled");
        }
        if !error.recoverable {
            return self.skip(agent, error, "error flag marked non-recoverable");
        }
        if !self.policy.is_auto_retryable(error.error_type) {
            return self.skip(agent, error, "error type not in the recoverable list");
        }

        let ctx = RecoveryContext {
            agent,
            error,
            still_producing_output,
        };
        let outcome = match self.recovery.recover(&ctx) {
            Ok(outcome) => outcome,
            Err(e) => return self.skip(agent, error, &e.to_string()),
        };
        if !outcome.success {
            return self.skip(agent, error, "no strategy can handle this error kind");
        }

        let key = RetryKey {
            agent,
            error_type: error.error_type,
            run_id: run_id.to_string(),
        };

        match self.retry.record_occurrence(&key) {
            Ok(_attempt) => {
                self.history.record(RecoveryHistoryEntry {
                    agent,
                    error_type: error.error_type,
                    outcome: Some(outcome.action),
                    message: outcome.message,
                });
                ErrorOutcome::Recovered { action: outcome.action }
            }
            Err(exhausted) => {
                self.history.record(RecoveryHistoryEntry {
                    agent,
                    error_type: error.error_type,
                    outcome: None,
                    message: exhausted.to_string(),
                });
                ErrorOutcome::Aborted {
                    cause: exhausted.to_string(),
                }
            }
        }
    }

    fn skip(&mut self, agent: AgentName, error: &ErrorFlag, reason: &str) -> ErrorOutcome {
        self.history.record(RecoveryHistoryEntry {
            agent,
            error_type: error.error_type,
            outcome: None,
            message: reason.to_string(),
        });
        ErrorOutcome::Skipped {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ErrorKind;
    use chrono::Utc;
    use std::time::Duration;

    fn flag(kind: ErrorKind, recoverable: bool) -> ErrorFlag {
        ErrorFlag {
            agent: AgentName::Builder,
            error_type: kind,
            message: "boom".into(),
            timestamp: Utc::now(),
            recoverable,
        }
    }

    #[tokio::test]
    async fn non_recoverable_flag_is_skipped() {
        let mut service = ErrorRecoveryService::new(BackoffConfig::default(), true);
        let outcome = service
            .handle("run-1", AgentName::Builder, &flag(ErrorKind::Crash, false), false)
            .await;
        assert!(matches!(outcome, ErrorOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn auto_retry_disabled_skips_even_recoverable_flags() {
        let mut service = ErrorRecoveryService::new(BackoffConfig::default(), false);
        let outcome = service
            .handle("run-1", AgentName::Builder, &flag(ErrorKind::Crash, true), false)
            .await;
        assert!(matches!(outcome, ErrorOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn unlisted_error_type_is_skipped() {
        let mut service = ErrorRecoveryService::new(BackoffConfig::default(), true);
        let outcome = service
            .handle("run-1", AgentName::Builder, &flag(ErrorKind::Other, true), false)
            .await;
        assert!(matches!(outcome, ErrorOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn recoverable_crash_is_recovered_via_restart() {
        let mut service = ErrorRecoveryService::new(
            BackoffConfig {
                base: Duration::from_millis(1),
                multiplier: 1.0,
                cap: Duration::from_millis(1),
                max_attempts: 2,
            },
            true,
        );
        let outcome = service
            .handle("run-1", AgentName::Builder, &flag(ErrorKind::Crash, true), false)
            .await;
        assert_eq!(outcome, ErrorOutcome::Recovered { action: RecoveryAction::Restart });
        assert_eq!(service.history().len(), 1);
    }

    /// Mirrors SPEC_FULL §8 scenario 5: the same error kind recurs across
    /// three independently-detected occurrences (e.g. the agent keeps
    /// timing out after each restart); the third exhausts the budget.
    #[tokio::test]
    async fn three_consecutive_timeouts_exhaust_the_retry_budget() {
        let mut service = ErrorRecoveryService::new(
            BackoffConfig {
                max_attempts: 3,
                ..BackoffConfig::default()
            },
            true,
        );
        let error = flag(ErrorKind::Timeout, true);

        for _ in 0..3 {
            let outcome = service.handle("run-1", AgentName::Verifier, &error, false).await;
            assert_eq!(outcome, ErrorOutcome::Recovered { action: RecoveryAction::Restart });
        }

        let outcome = service.handle("run-1", AgentName::Verifier, &error, false).await;
        assert!(matches!(outcome, ErrorOutcome::Aborted { .. }));
        assert_eq!(service.history().len(), 4);
    }

    #[tokio::test]
    async fn reset_agent_lets_the_budget_start_over() {
        let mut service = ErrorRecoveryService::new(
            BackoffConfig {
                max_attempts: 1,
                ..BackoffConfig::default()
            },
            true,
        );
        let error = flag(ErrorKind::Crash, true);

        let first = service.handle("run-1", AgentName::Builder, &error, false).await;
        assert_eq!(first, ErrorOutcome::Recovered { action: RecoveryAction::Restart });

        let exhausted = service.handle("run-1", AgentName::Builder, &error, false).await;
        assert!(matches!(exhausted, ErrorOutcome::Aborted { .. }));

        service.reset_agent(AgentName::Builder);

        let after_reset = service.handle("run-1", AgentName::Builder, &error, false).await;
        assert_eq!(after_reset, ErrorOutcome::Recovered { action: RecoveryAction::Restart });
    }
}
