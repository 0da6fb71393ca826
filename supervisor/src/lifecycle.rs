//! AgentLifecycle: composes TerminalController + AgentMonitor + StateStore
//! for one agent (SPEC_FULL §4.11).
//!
//! Grounded in `harness/session.rs::SessionManager`'s status-transition
//! discipline: update the durable record *before* the side effect becomes
//! externally observable, and always pair monitoring start/stop with the
//! corresponding lifecycle transition.

use std::path::Path;

use chrono::Utc;
use tracing::info;

use crate::run::{AgentName, AgentStatus, ModelTier, Run, StateStore, StoreError};
use crate::terminal::{AgentMonitor, MonitorConfig, OutputStreamer, TerminalController, TerminalError};

/// Composition of the three capabilities SPEC_FULL §4.11 names, plus the
/// output streamer (SPEC_FULL §4.5), scoped to driving a single agent
/// through its lifecycle within one run. The streamer is watched/stopped in
/// lockstep with the monitor: both derive their state from the same pane,
/// and both must stop watching before an agent is marked completed/failed.
pub struct AgentLifecycle<'a> {
    terminal: &'a mut TerminalController,
    monitor: &'a mut AgentMonitor,
    streamer: &'a mut OutputStreamer,
    store: &'a StateStore,
}

impl<'a> AgentLifecycle<'a> {
    pub fn new(
        terminal: &'a mut TerminalController,
        monitor: &'a mut AgentMonitor,
        streamer: &'a mut OutputStreamer,
        store: &'a StateStore,
    ) -> Self {
        Self { terminal, monitor, streamer, store }
    }

    /// Start `agent`: flip its status to `running` in `state.json` *before*
    /// spawning the pane, then begin monitoring. Invariant (§4.11): status
    /// transitions are reflected in StateStore before the external side
    /// effect is observable.
    pub fn start(
        &mut self,
        run: &mut Run,
        agent: AgentName,
        tier: ModelTier,
        prompt_file: &Path,
        project_root: &Path,
        monitor_config: MonitorConfig,
    ) -> Result<(), LifecycleError> {
        run.agent_mut(agent).status = AgentStatus::Running;
        run.agent_mut(agent).started_at = Some(Utc::now());
        run.agent_mut(agent).completed_at = None;
        run.agent_mut(agent).error = None;
        self.store.save(run)?;

        self.terminal.start_agent(agent, tier, prompt_file, project_root)?;
        self.monitor.watch(agent, monitor_config);
        self.streamer.watch(agent);
        info!(%agent, "agent lifecycle started");
        Ok(())
    }

    pub fn stop(&mut self, agent: AgentName) -> Result<(), LifecycleError> {
        self.monitor.stop(agent);
        self.streamer.stop(agent);
        self.terminal.clear_agent(agent)?;
        Ok(())
    }

    pub fn clear(&mut self, agent: AgentName) -> Result<(), LifecycleError> {
        self.terminal.clear_agent(agent)?;
        Ok(())
    }

    pub fn restart_with_clarification(
        &mut self,
        run: &mut Run,
        agent: AgentName,
        tier: ModelTier,
        prompt_file: &Path,
        project_root: &Path,
        monitor_config: MonitorConfig,
    ) -> Result<(), LifecycleError> {
        self.monitor.stop(agent);
        self.streamer.stop(agent);
        run.agent_mut(agent).status = AgentStatus::Running;
        run.agent_mut(agent).error = None;
        self.store.save(run)?;

        self.terminal
            .restart_agent_with_clarification(agent, tier, prompt_file, project_root)?;
        self.monitor.watch(agent, monitor_config);
        self.streamer.watch(agent);
        Ok(())
    }

    /// Mark `agent` completed. Monitoring is removed before the state is
    /// marked completed, per the invariant "monitoring is always paired
    /// with starting and removed before marking completed/failed".
    pub fn complete(&mut self, run: &mut Run, agent: AgentName) -> Result<(), LifecycleError> {
        self.monitor.stop(agent);
        self.streamer.stop(agent);
        run.agent_mut(agent).status = AgentStatus::Completed;
        run.agent_mut(agent).completed_at = Some(Utc::now());
        self.store.save(run)?;
        Ok(())
    }

    pub fn fail(&mut self, run: &mut Run, agent: AgentName, reason: &str) -> Result<(), LifecycleError> {
        self.monitor.stop(agent);
        self.streamer.stop(agent);
        run.agent_mut(agent).status = AgentStatus::Failed;
        run.agent_mut(agent).completed_at = Some(Utc::now());
        self.store.save(run)?;
        info!(%agent, reason, "agent lifecycle failed");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Terminal(#[from] TerminalError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{new_run_id, RunDirectory};

    #[test]
    fn complete_clears_monitor_and_updates_state() {
        let tmp = tempfile::tempdir().unwrap();
        let run_id = new_run_id(Utc::now());
        let dir = RunDirectory::new(tmp.path(), "supervisor", &run_id);
        dir.ensure_created().unwrap();
        let store = StateStore::new(dir);
        let mut run = Run::new(run_id, 3);

        let mut terminal = TerminalController::new(&run.run_id, "/bin/true");
        let mut monitor = AgentMonitor::new();
        monitor.watch(AgentName::Builder, MonitorConfig::default());
        let mut streamer = OutputStreamer::new(crate::terminal::StreamerConfig::default());
        streamer.watch(AgentName::Builder);

        let mut lifecycle = AgentLifecycle::new(&mut terminal, &mut monitor, &mut streamer, &store);
        lifecycle.complete(&mut run, AgentName::Builder).unwrap();

        assert_eq!(run.builder.status, AgentStatus::Completed);
        assert!(run.builder.completed_at.is_some());
        assert!(!monitor.is_watching(AgentName::Builder));
        assert!(!streamer.is_watching(AgentName::Builder));
    }

    #[test]
    fn fail_marks_agent_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let run_id = new_run_id(Utc::now());
        let dir = RunDirectory::new(tmp.path(), "supervisor", &run_id);
        dir.ensure_created().unwrap();
        let store = StateStore::new(dir);
        let mut run = Run::new(run_id, 3);

        let mut terminal = TerminalController::new(&run.run_id, "/bin/true");
        let mut monitor = AgentMonitor::new();
        let mut streamer = OutputStreamer::new(crate::terminal::StreamerConfig::default());

        let mut lifecycle = AgentLifecycle::new(&mut terminal, &mut monitor, &mut streamer, &store);
        lifecycle.fail(&mut run, AgentName::Verifier, "stalled").unwrap();

        assert_eq!(run.verifier.status, AgentStatus::Failed);
    }
}
