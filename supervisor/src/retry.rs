//! RetryManager: bounded-exponential backoff keyed by `(agent, errorType,
//! runId)`.
//!
//! Grounded in `harness/git_manager.rs::run_git_with_retry` (the backoff
//! math: `base * multiplier^(attempt-1)`, capped, with an `is_retryable`
//! gate) and `feedback/correction_loop.rs::TieredCorrectionLoop`'s
//! per-key attempt accounting.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::run::{AgentName, ErrorKind};

/// Key under which attempt counters are tracked, per SPEC_FULL §4.7.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub agent: AgentName,
    pub error_type: ErrorKind,
    pub run_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            multiplier: 2.0,
            cap: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl BackoffConfig {
    /// Sleep duration before attempt `attempt` (1-based), i.e.
    /// `base * multiplier^(attempt-1)`, capped at `cap`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }
}

#[derive(Debug, Error)]
#[error("retry exhausted for {agent} / {error_type} / {run_id} after {total_attempts} attempts: {last_error}")]
pub struct RetryExhausted {
    pub agent: AgentName,
    pub error_type: ErrorKind,
    pub run_id: String,
    pub total_attempts: u32,
    pub last_error: String,
}

/// Events a caller may want to observe; surfaced through `events::Event`
/// rather than returned directly (see events.rs).
#[derive(Debug, Clone)]
pub enum RetryEvent {
    Started { key: RetryKey, attempt: u32, max_attempts: u32 },
    Success { key: RetryKey, attempt: u32 },
    Exhausted { key: RetryKey, total_attempts: u32 },
}

/// Tracks per-key attempt counts across calls to `execute_with_retry`.
#[derive(Debug, Default)]
pub struct RetryManager {
    config: BackoffConfig,
    attempts: HashMap<RetryKey, u32>,
}

impl RetryManager {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: HashMap::new(),
        }
    }

    /// Reset the attempt counter for `key`, e.g. after a successful run or
    /// an operator-initiated `recover --force`.
    pub fn reset(&mut self, key: &RetryKey) {
        self.attempts.remove(key);
    }

    /// Reset every key belonging to `agent`, regardless of error type —
    /// called once an agent completes successfully so a stale attempt
    /// count from an earlier recovered error doesn't count against a later,
    /// unrelated one (SPEC_FULL §4.7: "can be reset externally").
    pub fn reset_agent(&mut self, agent: AgentName) {
        self.attempts.retain(|key, _| key.agent != agent);
    }

    pub fn attempt_count(&self, key: &RetryKey) -> u32 {
        *self.attempts.get(key).unwrap_or(&0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Account for one more occurrence of `key` without retrying an
    /// operation in a blocking loop. This is what [`ErrorRecoveryService`]
    /// uses: each occurrence of the same `(agent, errorType, runId)` arrives
    /// as its own, independently-detected `error.flag`/timeout some time
    /// after the previous recovery attempt was issued, so there is nothing
    /// to synchronously retry against — "retrying" here means waiting for
    /// whatever the next occurrence turns out to be. Returns the 1-based
    /// attempt number while the budget remains, incrementing the stored
    /// count; returns [`RetryExhausted`] without incrementing once
    /// `max_attempts` has already been reached for this key.
    ///
    /// [`ErrorRecoveryService`]: crate::error_recovery::ErrorRecoveryService
    pub fn record_occurrence(&mut self, key: &RetryKey) -> Result<u32, RetryExhausted> {
        let max_attempts = self.config.max_attempts;
        let count = self.attempts.entry(key.clone()).or_insert(0);
        if *count >= max_attempts {
            return Err(RetryExhausted {
                agent: key.agent,
                error_type: key.error_type,
                run_id: key.run_id.clone(),
                total_attempts: *count,
                last_error: "retry budget exhausted".to_string(),
            });
        }
        *count += 1;
        Ok(*count)
    }

    /// Run `op` with bounded exponential backoff. `op` is retried while it
    /// returns `Err` and the attempt budget remains; on exhaustion the last
    /// error is wrapped in `RetryExhausted`. Emits `RetryEvent`s via
    /// `on_event` at each step (SPEC_FULL §4.7: `retry_started` /
    /// `retry_success` / `retry_exhausted`).
    pub async fn execute_with_retry<T, E, F, Fut>(
        &mut self,
        key: RetryKey,
        mut op: F,
        mut on_event: impl FnMut(RetryEvent),
    ) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.config.max_attempts;
        let mut last_error = String::new();
        loop {
            let attempt = self.attempts.entry(key.clone()).or_insert(0);
            *attempt += 1;
            let attempt = *attempt;

            on_event(RetryEvent::Started {
                key: key.clone(),
                attempt,
                max_attempts,
            });
            info!(agent = %key.agent, error_type = %key.error_type, run_id = %key.run_id, attempt, "retry attempt");

            match op().await {
                Ok(value) => {
                    on_event(RetryEvent::Success {
                        key: key.clone(),
                        attempt,
                    });
                    self.attempts.remove(&key);
                    return Ok(value);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(agent = %key.agent, attempt, error = %last_error, "retry attempt failed");
                    if attempt >= max_attempts {
                        on_event(RetryEvent::Exhausted {
                            key: key.clone(),
                            total_attempts: attempt,
                        });
                        return Err(RetryExhausted {
                            agent: key.agent,
                            error_type: key.error_type,
                            run_id: key.run_id,
                            total_attempts: attempt,
                            last_error,
                        });
                    }
                    tokio::time::sleep(self.config.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key() -> RetryKey {
        RetryKey {
            agent: AgentName::Builder,
            error_type: ErrorKind::Crash,
            run_id: "run-20260727000000".into(),
        }
    }

    #[test]
    fn backoff_follows_base_multiplier_power_capped() {
        let cfg = BackoffConfig {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            cap: Duration::from_millis(350),
            max_attempts: 5,
        };
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_attempt(3), Duration::from_millis(350)); // would be 400, capped
    }

    #[tokio::test]
    async fn succeeds_without_retry_resets_counter() {
        let mut mgr = RetryManager::new(BackoffConfig::default());
        let result: Result<u32, String> = mgr
            .execute_with_retry(key(), || async { Ok::<_, String>(42) }, |_| {})
            .await
            .map_err(|e| e.to_string());
        assert_eq!(result, Ok(42));
        assert_eq!(mgr.attempt_count(&key()), 0);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts_and_reports_count() {
        let mut mgr = RetryManager::new(BackoffConfig {
            base: Duration::from_millis(1),
            multiplier: 1.0,
            cap: Duration::from_millis(1),
            max_attempts: 3,
        });
        let calls = AtomicU32::new(0);
        let mut events = Vec::new();
        let result = mgr
            .execute_with_retry(
                key(),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<u32, _>("boom") }
                },
                |e| events.push(e),
            )
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.total_attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(events.last(), Some(RetryEvent::Exhausted { total_attempts: 3, .. })));
    }

    #[tokio::test]
    async fn reset_clears_attempt_counter() {
        let mut mgr = RetryManager::new(BackoffConfig {
            base: Duration::from_millis(1),
            multiplier: 1.0,
            cap: Duration::from_millis(1),
            max_attempts: 2,
        });
        let _ = mgr
            .execute_with_retry(key(), || async { Err::<u32, _>("boom") }, |_| {})
            .await;
        assert_eq!(mgr.attempt_count(&key()), 2);
        mgr.reset(&key());
        assert_eq!(mgr.attempt_count(&key()), 0);
    }

    #[test]
    fn record_occurrence_accumulates_across_separate_calls_then_exhausts() {
        let mut mgr = RetryManager::new(BackoffConfig {
            max_attempts: 3,
            ..BackoffConfig::default()
        });
        assert_eq!(mgr.record_occurrence(&key()).unwrap(), 1);
        assert_eq!(mgr.record_occurrence(&key()).unwrap(), 2);
        assert_eq!(mgr.record_occurrence(&key()).unwrap(), 3);
        let err = mgr.record_occurrence(&key()).unwrap_err();
        assert_eq!(err.total_attempts, 3);
        assert_eq!(mgr.attempt_count(&key()), 3);
    }

    #[test]
    fn reset_agent_clears_every_error_type_for_that_agent_only() {
        let mut mgr = RetryManager::new(BackoffConfig::default());
        let builder_crash = key();
        let builder_timeout = RetryKey {
            error_type: ErrorKind::Timeout,
            ..key()
        };
        let verifier_crash = RetryKey {
            agent: AgentName::Verifier,
            ..key()
        };
        mgr.record_occurrence(&builder_crash).unwrap();
        mgr.record_occurrence(&builder_timeout).unwrap();
        mgr.record_occurrence(&verifier_crash).unwrap();

        mgr.reset_agent(AgentName::Builder);

        assert_eq!(mgr.attempt_count(&builder_crash), 0);
        assert_eq!(mgr.attempt_count(&builder_timeout), 0);
        assert_eq!(mgr.attempt_count(&verifier_crash), 1);
    }
}
