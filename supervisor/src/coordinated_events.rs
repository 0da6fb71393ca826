//! EventCoordinator: fan-in of every subsystem's signals into one typed,
//! topic-addressable stream (SPEC_FULL §4.14-adjacent component table).
//!
//! Grounded directly in `events/bus.rs`'s `EventBus`/`EventFilter` —
//! a `tokio::sync::broadcast` channel carrying a `#[serde(tag = "type")]`
//! sum type, with a filter builder for topic-scoped subscriptions. This
//! replaces the Design Notes' flagged "emitter-style event objects and
//! dynamic listener maps" with a single typed sender per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::recovery::RecoveryAction;
use crate::run::{AgentName, ErrorFlag, RunId, RunPhase, VerdictKind};

/// The coordinated-event sum type every subsystem emits into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    AgentStarted { run_id: RunId, agent: AgentName },
    AgentDone { run_id: RunId, agent: AgentName },
    AgentError { run_id: RunId, agent: AgentName, error: ErrorFlag },
    AgentStale { run_id: RunId, agent: AgentName, inactive_ms: u64 },
    AgentTimeout { run_id: RunId, agent: AgentName },
    AgentOutput { run_id: RunId, agent: AgentName, delta: String },
    CrpCreated { run_id: RunId, crp_id: String, created_by: AgentName },
    VcrCreated { run_id: RunId, vcr_id: String, crp_id: String },
    WaitingForHuman { run_id: RunId, crp_id: String },
    PhaseTransitioned { run_id: RunId, from: RunPhase, to: RunPhase, iteration: u32 },
    TransitionBlocked { run_id: RunId, from: RunPhase, to: RunPhase },
    VerdictReceived { run_id: RunId, verdict: VerdictKind },
    RetryStarted { run_id: RunId, agent: AgentName, attempt: u32, max_attempts: u32 },
    RetrySuccess { run_id: RunId, agent: AgentName, attempt: u32 },
    RetryExhausted { run_id: RunId, agent: AgentName, total_attempts: u32 },
    RecoverySkipped { run_id: RunId, agent: AgentName, reason: String },
    RecoveryAttempted { run_id: RunId, agent: AgentName, action: RecoveryAction },
    RunCompleted { run_id: RunId },
    RunFailed { run_id: RunId, reason: String },
    TestsReady { run_id: RunId, agent: AgentName },
    TestOutputReceived { run_id: RunId, agent: AgentName },
}

impl Event {
    pub fn run_id(&self) -> &RunId {
        match self {
            Event::AgentStarted { run_id, .. }
            | Event::AgentDone { run_id, .. }
            | Event::AgentError { run_id, .. }
            | Event::AgentStale { run_id, .. }
            | Event::AgentTimeout { run_id, .. }
            | Event::AgentOutput { run_id, .. }
            | Event::CrpCreated { run_id, .. }
            | Event::VcrCreated { run_id, .. }
            | Event::WaitingForHuman { run_id, .. }
            | Event::PhaseTransitioned { run_id, .. }
            | Event::TransitionBlocked { run_id, .. }
            | Event::VerdictReceived { run_id, .. }
            | Event::RetryStarted { run_id, .. }
            | Event::RetrySuccess { run_id, .. }
            | Event::RetryExhausted { run_id, .. }
            | Event::RecoverySkipped { run_id, .. }
            | Event::RecoveryAttempted { run_id, .. }
            | Event::RunCompleted { run_id }
            | Event::RunFailed { run_id, .. }
            | Event::TestsReady { run_id, .. }
            | Event::TestOutputReceived { run_id, .. } => run_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::AgentStarted { .. } => "agent_started",
            Event::AgentDone { .. } => "agent_done",
            Event::AgentError { .. } => "agent_error",
            Event::AgentStale { .. } => "agent_stale",
            Event::AgentTimeout { .. } => "agent_timeout",
            Event::AgentOutput { .. } => "agent_output",
            Event::CrpCreated { .. } => "crp_created",
            Event::VcrCreated { .. } => "vcr_created",
            Event::WaitingForHuman { .. } => "waiting_for_human",
            Event::PhaseTransitioned { .. } => "phase_transitioned",
            Event::TransitionBlocked { .. } => "transition_blocked",
            Event::VerdictReceived { .. } => "verdict_received",
            Event::RetryStarted { .. } => "retry_started",
            Event::RetrySuccess { .. } => "retry_success",
            Event::RetryExhausted { .. } => "retry_exhausted",
            Event::RecoverySkipped { .. } => "recovery_skipped",
            Event::RecoveryAttempted { .. } => "recovery_attempted",
            Event::RunCompleted { .. } => "run_completed",
            Event::RunFailed { .. } => "run_failed",
            Event::TestsReady { .. } => "tests_ready",
            Event::TestOutputReceived { .. } => "test_output_received",
        }
    }
}

/// A logged event line, as appended to `logs/events.log` (SPEC_FULL §6, §7
/// — the cause chain on `failed` runs is preserved here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogLine {
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Subscription filter: by run, and/or by a set of event type tags
/// (matched against [`Event::event_type`]).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    run_id: Option<RunId>,
    types: Option<Vec<&'static str>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn types(mut self, types: Vec<&'static str>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(run_id) = &self.run_id {
            if event.run_id() != run_id {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.contains(&event.event_type()) {
                return false;
            }
        }
        true
    }
}

/// Fan-in bus for one run's coordinated event stream, backed by a
/// `tokio::sync::broadcast` channel (grounded in `events/bus.rs::EventBus`).
pub struct EventCoordinator {
    sender: broadcast::Sender<Event>,
}

impl EventCoordinator {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // A lagging/absent receiver must never block emission; the result
        // is only `Err` when there are zero subscribers, which is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// A receiver that only yields events matching `filter`.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver {
            inner: self.sender.subscribe(),
            filter,
        }
    }
}

pub struct FilteredReceiver {
    inner: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        loop {
            let event = self.inner.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(run_id: &str) -> Event {
        Event::AgentDone {
            run_id: run_id.to_string(),
            agent: AgentName::Builder,
        }
    }

    #[test]
    fn filter_by_run_id() {
        let filter = EventFilter::new().run("run-1");
        assert!(filter.matches(&done("run-1")));
        assert!(!filter.matches(&done("run-2")));
    }

    #[test]
    fn filter_by_type() {
        let filter = EventFilter::new().types(vec!["agent_done"]);
        assert!(filter.matches(&done("run-1")));
        assert!(!filter.matches(&Event::RunCompleted { run_id: "run-1".into() }));
    }

    #[tokio::test]
    async fn subscribe_filtered_skips_non_matching_events() {
        let bus = EventCoordinator::new(16);
        let mut rx = bus.subscribe_filtered(EventFilter::new().types(vec!["run_completed"]));
        bus.publish(done("run-1"));
        bus.publish(Event::RunCompleted { run_id: "run-1".into() });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::RunCompleted { .. }));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventCoordinator::new(4);
        bus.publish(done("run-1"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
