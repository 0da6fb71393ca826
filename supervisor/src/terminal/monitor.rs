//! AgentMonitor: per-agent hard-deadline and inactivity timers
//! (SPEC_FULL §4.4).
//!
//! Grounded in `harness/session.rs`'s elapsed-time accounting
//! (`SessionManager::elapsed_human`) and the polling-loop shape of
//! `router/canary.rs`.

use std::time::{Duration, Instant};

use tracing::info;

use crate::run::AgentName;

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub max_wall_time: Duration,
    pub max_inactivity: Duration,
    pub probe_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_wall_time: Duration::from_secs(30 * 60),
            max_inactivity: Duration::from_secs(2 * 60),
            probe_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Stale { agent: AgentName, inactive_for: Duration },
    Timeout { agent: AgentName },
}

struct Watch {
    config: MonitorConfig,
    started_at: Instant,
    last_activity_at: Instant,
    last_snapshot_len: usize,
}

/// Tracks one timer pair per watched agent. Stopping is idempotent: calling
/// `stop` on an agent that isn't watched is a no-op.
#[derive(Default)]
pub struct AgentMonitor {
    watches: std::collections::HashMap<AgentName, Watch>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&mut self, agent: AgentName, config: MonitorConfig) {
        let now = Instant::now();
        self.watches.insert(
            agent,
            Watch {
                config,
                started_at: now,
                last_activity_at: now,
                last_snapshot_len: 0,
            },
        );
    }

    pub fn stop(&mut self, agent: AgentName) {
        self.watches.remove(&agent);
    }

    pub fn is_watching(&self, agent: AgentName) -> bool {
        self.watches.contains_key(&agent)
    }

    /// Feed the latest scrollback snapshot for `agent`. Resets the
    /// inactivity timer when the snapshot length changed.
    pub fn record_snapshot(&mut self, agent: AgentName, snapshot: &str) {
        if let Some(watch) = self.watches.get_mut(&agent) {
            if snapshot.len() != watch.last_snapshot_len {
                watch.last_snapshot_len = snapshot.len();
                watch.last_activity_at = Instant::now();
            }
        }
    }

    /// Evaluate timers for every watched agent, returning any events that
    /// fired. Called on `probe_interval` ticks by the orchestrator's event
    /// loop.
    pub fn poll(&mut self) -> Vec<MonitorEvent> {
        let now = Instant::now();
        let mut events = Vec::new();
        for (agent, watch) in self.watches.iter() {
            if now.duration_since(watch.started_at) >= watch.config.max_wall_time {
                events.push(MonitorEvent::Timeout { agent: *agent });
                continue;
            }
            let inactive_for = now.duration_since(watch.last_activity_at);
            if inactive_for >= watch.config.max_inactivity {
                events.push(MonitorEvent::Stale {
                    agent: *agent,
                    inactive_for,
                });
            }
        }
        for event in &events {
            info!(?event, "agent monitor event");
        }
        events
    }
}
