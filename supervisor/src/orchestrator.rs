//! Orchestrator: the top-level driver loop composing every other component
//! into one run's lifecycle (SPEC_FULL §4.14).
//!
//! Grounded in `harness/session.rs`'s top-level driver — a single
//! `tokio::select!` loop fanning in filesystem events and periodic probes,
//! delegating each concern to a narrow collaborator rather than inlining
//! their logic here — generalised from one interactive coding session to
//! the four-phase Refiner/Builder/Verifier/Gatekeeper pipeline.

use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, Utc};
use minijinja::Environment;
use tokio::sync::{mpsc, watch};

use crate::config::SupervisorConfig;
use crate::coordinated_events::{Event, EventCoordinator};
use crate::coordinator::{AgentCoordinator, CoordinatorAction};
use crate::error::{SupervisorError, SupervisorResult};
use crate::error_recovery::{ErrorOutcome, ErrorRecoveryService};
use crate::lifecycle::AgentLifecycle;
use crate::mission::RunSpawner;
use crate::model_selector::ModelSelector;
use crate::phase::{PhaseMachine, VerdictRoute};
use crate::prompts::{render_prompt, template_name_for, PromptContext, VerifierPhase};
use crate::recovery::RecoveryAction;
use crate::retry::BackoffConfig;
use crate::run::dir::{atomic_write, remove_if_present};
use crate::run::{
    new_run_id, AgentName, AgentStatus, ErrorFlag, ErrorKind, HumanResolution, Run, RunDirectory,
    RunId, RunPhase, StateStore, Verdict, VerdictKind,
};
use crate::terminal::{
    AgentMonitor, MonitorConfig, OutputStreamer, StreamerConfig, StreamerEvent, TerminalController,
};
use crate::usage::PriceTable;
use crate::validation::validate_briefing;
use crate::watcher::{FileWatcher, WatchEvent};

/// The outcome of driving a run to either a terminal phase or a pause point.
/// Maps directly onto the `start` subcommand's exit-code contract
/// (SPEC_FULL §6): 0/1/2/3 respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    WaitingHuman,
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Failed => 1,
            RunOutcome::WaitingHuman => 2,
            RunOutcome::Cancelled => 3,
        }
    }
}

/// Composes every component SPEC_FULL's component table names into one run
/// driver. Immutable after construction: every mutable collaborator
/// (`TerminalController`, `AgentMonitor`, `StateStore`, ...) is scoped to a
/// single `drive` call rather than owned here, so `start_run`/`resume_run`
/// can run concurrently over different runs from one `Orchestrator`.
pub struct Orchestrator {
    project_root: PathBuf,
    config: SupervisorConfig,
    templates: Environment<'static>,
    events: EventCoordinator,
    usage_prices: PriceTable,
}

impl Orchestrator {
    pub fn new(project_root: impl Into<PathBuf>, config: SupervisorConfig) -> Self {
        let project_root = project_root.into();
        let templates_dir = project_root
            .join(format!(".{}", config.app_dir_name))
            .join("templates");
        let mut templates = Environment::new();
        templates.set_loader(minijinja::path_loader(templates_dir));
        Self {
            project_root,
            config,
            templates,
            events: EventCoordinator::new(256),
            usage_prices: PriceTable::default(),
        }
    }

    pub fn events(&self) -> &EventCoordinator {
        &self.events
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            max_wall_time: self.config.max_wall_time(),
            max_inactivity: self.config.max_inactivity(),
            probe_interval: self.config.probe_interval(),
        }
    }

    fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            min_interval: self.config.min_poll_interval(),
            max_interval: self.config.max_poll_interval(),
        }
    }

    fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            base: std::time::Duration::from_millis(self.config.retry_base_ms),
            multiplier: self.config.retry_multiplier,
            cap: std::time::Duration::from_millis(self.config.retry_cap_ms),
            max_attempts: self.config.retry_max_attempts,
        }
    }

    /// Allocate a fresh run id, retrying on the (rare) same-second collision
    /// with an already-materialised run directory.
    fn allocate_run_id(&self) -> RunId {
        let mut now = Utc::now();
        loop {
            let candidate = new_run_id(now);
            let dir = RunDirectory::new(&self.project_root, &self.config.app_dir_name, &candidate);
            if !dir.root().exists() {
                return candidate;
            }
            now += ChronoDuration::seconds(1);
        }
    }

    fn render_agent_prompt(
        &self,
        dir: &RunDirectory,
        run: &Run,
        agent: AgentName,
        has_review: bool,
        clarification: Option<String>,
        phase: VerifierPhase,
    ) -> SupervisorResult<PathBuf> {
        let template_name = template_name_for(agent, self.config.two_phase_verifier, phase);
        let ctx = PromptContext {
            project_root: self.project_root.display().to_string(),
            run_id: run.run_id.clone(),
            config: serde_json::to_value(&self.config)?,
            iteration: run.iteration,
            has_review,
            clarification,
        };
        let out_path = dir.prompt_file(agent.as_str());
        render_prompt(&self.templates, &template_name, &ctx, agent, &out_path)?;
        Ok(out_path)
    }

    fn render_all_prompts(&self, dir: &RunDirectory, run: &Run) -> SupervisorResult<()> {
        for agent in AgentName::ALL {
            self.render_agent_prompt(dir, run, agent, false, None, VerifierPhase::One)?;
        }
        Ok(())
    }

    fn write_mrp(&self, dir: &RunDirectory, run: &Run) -> SupervisorResult<()> {
        let summary = format!(
            "# Merge Readiness Packet\n\nRun: {}\nIterations: {}\nTotal cost: ${:.4}\n",
            run.run_id, run.iteration, run.usage.total_cost_usd
        );
        atomic_write(dir.mrp_summary(), summary.as_bytes())
            .map_err(|e| SupervisorError::io(dir.mrp_summary(), e))?;

        let evidence = serde_json::json!({
            "run_id": run.run_id,
            "iteration": run.iteration,
            "usage": run.usage,
        });
        atomic_write(dir.mrp_evidence(), serde_json::to_vec_pretty(&evidence)?.as_slice())
            .map_err(|e| SupervisorError::io(dir.mrp_evidence(), e))?;
        Ok(())
    }

    /// Validate, allocate, and materialise a fresh run directory, then drive
    /// it to completion, a human pause, or failure (SPEC_FULL §4.14 steps
    /// 1-5 plus the driver loop).
    pub async fn start_run(&self, briefing: &str) -> SupervisorResult<(RunId, RunOutcome)> {
        let (_tx, rx) = watch::channel(false);
        self.start_run_cancellable(briefing, rx).await
    }

    /// As [`start_run`], but stops early with [`RunOutcome::Cancelled`] once
    /// `cancel` is set to `true` (SPEC_FULL §5, CLI `Ctrl-C` handling).
    pub async fn start_run_cancellable(
        &self,
        briefing: &str,
        cancel: watch::Receiver<bool>,
    ) -> SupervisorResult<(RunId, RunOutcome)> {
        validate_briefing(briefing, self.config.max_briefing_length)
            .map_err(|e| SupervisorError::validation(e.to_string()))?;

        let run_id = self.allocate_run_id();
        let dir = RunDirectory::new(&self.project_root, &self.config.app_dir_name, &run_id);
        dir.ensure_created().map_err(|e| SupervisorError::io(dir.root(), e))?;
        atomic_write(dir.briefing_raw(), briefing.as_bytes())
            .map_err(|e| SupervisorError::io(dir.briefing_raw(), e))?;

        let selector = ModelSelector::new(self.config.dynamic_model_selection);
        let selection = selector.select(briefing, self.config.selection_strategy);

        let mut run = Run::new(run_id.clone(), self.config.max_iterations);
        run.selected_models = selection.models;

        let store = StateStore::new(dir.clone());
        store.save(&mut run)?;

        self.render_all_prompts(&dir, &run)?;

        let mut terminal = TerminalController::new(&run.run_id, self.config.agent_command.clone());
        let mut monitor = AgentMonitor::new();
        let mut streamer = OutputStreamer::new(self.streamer_config());
        {
            let prompt_file = dir.prompt_file(AgentName::Refiner.as_str());
            let mut lifecycle = AgentLifecycle::new(&mut terminal, &mut monitor, &mut streamer, &store);
            lifecycle.start(
                &mut run,
                AgentName::Refiner,
                run.selected_models.get(AgentName::Refiner),
                &prompt_file,
                &self.project_root,
                self.monitor_config(),
            )?;
        }
        self.events.publish(Event::AgentStarted {
            run_id: run.run_id.clone(),
            agent: AgentName::Refiner,
        });

        let (run, outcome) = self.drive(store, dir, run, terminal, monitor, streamer, cancel).await?;
        Ok((run.run_id, outcome))
    }

    /// Resume a run parked in `waiting_human`, driven by a separate `recover`
    /// CLI invocation (SPEC_FULL §4.15). If the pending CRP is still
    /// unresolved, returns [`RunOutcome::WaitingHuman`] without mutating
    /// anything.
    pub async fn resume_run(&self, run_id: &str) -> SupervisorResult<RunOutcome> {
        let (_tx, rx) = watch::channel(false);
        self.resume_run_cancellable(run_id, rx).await
    }

    pub async fn resume_run_cancellable(
        &self,
        run_id: &str,
        cancel: watch::Receiver<bool>,
    ) -> SupervisorResult<RunOutcome> {
        let run_id = run_id.to_string();
        let dir = RunDirectory::new(&self.project_root, &self.config.app_dir_name, &run_id);
        let store = StateStore::new(dir.clone());
        let mut run = store.load_required()?;

        if run.phase.is_terminal() {
            return Ok(match run.phase {
                RunPhase::Completed => RunOutcome::Completed,
                _ => RunOutcome::Failed,
            });
        }
        if run.phase != RunPhase::WaitingHuman {
            return Err(SupervisorError::validation(format!(
                "run {run_id} is in phase {} and is not waiting for human input",
                run.phase
            )));
        }

        let phase_machine = PhaseMachine::new();
        let mut terminal = TerminalController::new(&run.run_id, self.config.agent_command.clone());
        let mut monitor = AgentMonitor::new();
        let mut streamer = OutputStreamer::new(self.streamer_config());

        let Some(pending_crp_id) = run.pending_crp.clone() else {
            return Ok(RunOutcome::WaitingHuman);
        };
        let Some(vcr_id) =
            find_matching_vcr(&dir, &pending_crp_id).map_err(|e| SupervisorError::io(dir.vcr_dir(), e))?
        else {
            return Ok(RunOutcome::WaitingHuman);
        };

        self.resume_from_resolution(
            &dir,
            &store,
            &mut run,
            &mut terminal,
            &mut monitor,
            &mut streamer,
            &phase_machine,
            &vcr_id,
        )
        .await?;

        let (_, outcome) = self.drive(store, dir, run, terminal, monitor, streamer, cancel).await?;
        Ok(outcome)
    }

    /// Recover a run that was interrupted mid-agent by a supervisor crash:
    /// no multiplexer session survives the crash, so the agent recorded as
    /// `running` in `state.json` never actually completes on its own.
    /// Re-spawns that one agent against its already-rendered prompt file and
    /// resumes the driver loop (SPEC_FULL §6 `recover`). Runs parked in
    /// `waiting_human` are delegated to [`resume_run_cancellable`] instead,
    /// since those have no crashed agent to restart.
    pub async fn recover_run(&self, run_id: &str) -> SupervisorResult<RunOutcome> {
        let (_tx, rx) = watch::channel(false);
        self.recover_run_cancellable(run_id, rx).await
    }

    pub async fn recover_run_cancellable(
        &self,
        run_id: &str,
        cancel: watch::Receiver<bool>,
    ) -> SupervisorResult<RunOutcome> {
        let run_id = run_id.to_string();
        let dir = RunDirectory::new(&self.project_root, &self.config.app_dir_name, &run_id);
        let store = StateStore::new(dir.clone());
        let mut run = store.load_required()?;

        if run.phase.is_terminal() {
            return Ok(match run.phase {
                RunPhase::Completed => RunOutcome::Completed,
                _ => RunOutcome::Failed,
            });
        }
        if run.phase == RunPhase::WaitingHuman {
            return self.resume_run_cancellable(&run_id, cancel).await;
        }

        let mut terminal = TerminalController::new(&run.run_id, self.config.agent_command.clone());
        let mut monitor = AgentMonitor::new();
        let mut streamer = OutputStreamer::new(self.streamer_config());

        let stuck_agent = run.running_agents().into_iter().next();
        if let Some(agent) = stuck_agent {
            let prompt_file = dir.prompt_file(agent.as_str());
            let tier = run.selected_models.get(agent);
            {
                let mut lifecycle = AgentLifecycle::new(&mut terminal, &mut monitor, &mut streamer, &store);
                lifecycle.start(&mut run, agent, tier, &prompt_file, &self.project_root, self.monitor_config())?;
            }
            self.events.publish(Event::AgentStarted { run_id: run.run_id.clone(), agent });
        }

        let (_, outcome) = self.drive(store, dir, run, terminal, monitor, streamer, cancel).await?;
        Ok(outcome)
    }

    /// The shared driver loop: fan in sentinel-file events and periodic
    /// monitor probes until the run reaches a terminal phase, pauses for a
    /// human, or is cancelled.
    async fn drive(
        &self,
        store: StateStore,
        dir: RunDirectory,
        mut run: Run,
        mut terminal: TerminalController,
        mut monitor: AgentMonitor,
        mut streamer: OutputStreamer,
        mut cancel: watch::Receiver<bool>,
    ) -> SupervisorResult<(Run, RunOutcome)> {
        if run.phase.is_terminal() {
            let outcome = if run.phase == RunPhase::Completed {
                RunOutcome::Completed
            } else {
                RunOutcome::Failed
            };
            return Ok((run, outcome));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<WatchEvent>();
        let _watcher = FileWatcher::start(dir.root(), tx).map_err(|e| {
            SupervisorError::io(dir.root(), std::io::Error::other(e.to_string()))
        })?;

        let mut error_recovery = ErrorRecoveryService::new(self.backoff_config(), self.config.auto_retry_enabled);
        let phase_machine = PhaseMachine::new();
        let mut probe = tokio::time::interval(self.config.probe_interval());
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut next_sample = tokio::time::Instant::now() + self.config.min_poll_interval();

        let outcome = 'drive: loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else {
                        break 'drive RunOutcome::Failed;
                    };
                    if let Some(outcome) = self
                        .handle_watch_event(&dir, &store, &mut run, &mut terminal, &mut monitor, &mut streamer, &mut error_recovery, &phase_machine, event)
                        .await?
                    {
                        break 'drive outcome;
                    }
                }
                _ = tokio::time::sleep_until(next_sample) => {
                    let wait = self.sample_panes(&run, &terminal, &mut monitor, &mut streamer);
                    next_sample = tokio::time::Instant::now() + wait;
                }
                _ = probe.tick() => {
                    if let Some(outcome) = self
                        .check_crashed_agents(&dir, &store, &mut run, &mut terminal, &mut monitor, &mut streamer, &mut error_recovery, &phase_machine)
                        .await?
                    {
                        break 'drive outcome;
                    }

                    let events = monitor.poll();
                    let mut stop = None;
                    for event in events {
                        if let Some(outcome) = self
                            .handle_monitor_event(&dir, &store, &mut run, &mut terminal, &mut monitor, &mut streamer, &mut error_recovery, &phase_machine, event)
                            .await?
                        {
                            stop = Some(outcome);
                            break;
                        }
                    }
                    if let Some(outcome) = stop {
                        break 'drive outcome;
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        terminal.shutdown();
                        break 'drive RunOutcome::Cancelled;
                    }
                }
            }
        };

        terminal.shutdown();
        Ok((run, outcome))
    }

    /// Capture every running agent's pane once, feeding the scrollback-diff
    /// inactivity timer (SPEC_FULL §4.4) and the adaptive output sampler
    /// (SPEC_FULL §4.5) from the same snapshot, and publishing each agent's
    /// `NewOutput` delta as it's computed. Returns how long to wait before
    /// the next sample: the fastest interval any running agent's streamer
    /// now wants, or the configured max when nothing is running.
    fn sample_panes(
        &self,
        run: &Run,
        terminal: &TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
    ) -> std::time::Duration {
        let running = run.running_agents();
        let mut wait = self.config.max_poll_interval();
        for agent in running {
            let Ok(capture) = terminal.capture_pane(agent, 2000) else {
                continue;
            };
            monitor.record_snapshot(agent, &capture);
            for event in streamer.sample(agent, capture) {
                if let StreamerEvent::NewOutput { agent, delta } = event {
                    if !delta.is_empty() {
                        self.events.publish(Event::AgentOutput { run_id: run.run_id.clone(), agent, delta });
                    }
                }
            }
            wait = wait.min(streamer.next_interval_for(agent));
        }
        wait
    }

    async fn handle_watch_event(
        &self,
        dir: &RunDirectory,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
        error_recovery: &mut ErrorRecoveryService,
        phase_machine: &PhaseMachine,
        event: WatchEvent,
    ) -> SupervisorResult<Option<RunOutcome>> {
        match event {
            WatchEvent::Done { agent } => {
                remove_if_present(dir.agent_done_flag(agent.as_str())).ok();
                self.complete_and_route(dir, store, run, terminal, monitor, streamer, error_recovery, phase_machine, agent)
                    .await
            }
            WatchEvent::Error { agent, error } => {
                self.handle_agent_error(dir, store, run, terminal, monitor, streamer, error_recovery, phase_machine, agent, error)
                    .await
            }
            WatchEvent::CrpCreated { crp_id, created_by } => {
                self.events.publish(Event::CrpCreated {
                    run_id: run.run_id.clone(),
                    crp_id: crp_id.clone(),
                    created_by,
                });
                if run.agent(created_by).status == AgentStatus::Running {
                    {
                        let mut lifecycle = AgentLifecycle::new(terminal, monitor, streamer, store);
                        lifecycle.stop(created_by)?;
                    }
                    run.agent_mut(created_by).status = AgentStatus::Pending;
                    return self.pause_for_human(store, run, Some(crp_id)).await;
                }
                Ok(None)
            }
            WatchEvent::VcrCreated { vcr_id, crp_id } => {
                self.events.publish(Event::VcrCreated {
                    run_id: run.run_id.clone(),
                    vcr_id: vcr_id.clone(),
                    crp_id: crp_id.clone(),
                });
                if run.pending_crp.as_deref() != Some(crp_id.as_str()) {
                    return Ok(None);
                }
                self.resume_from_resolution(dir, store, run, terminal, monitor, streamer, phase_machine, &vcr_id)
                    .await
            }
            WatchEvent::TestsReady { agent } => {
                run.agent_mut(agent).status = AgentStatus::WaitingTestExecution;
                store.save(run)?;
                self.events.publish(Event::TestsReady { run_id: run.run_id.clone(), agent });
                Ok(None)
            }
            WatchEvent::TestOutput { agent } => {
                self.events
                    .publish(Event::TestOutputReceived { run_id: run.run_id.clone(), agent });
                if !self.config.two_phase_verifier || agent != AgentName::Verifier {
                    return Ok(None);
                }
                let prompt_file = self.render_agent_prompt(dir, run, agent, true, None, VerifierPhase::Two)?;
                let tier = run.selected_models.get(agent);
                {
                    let mut lifecycle = AgentLifecycle::new(terminal, monitor, streamer, store);
                    lifecycle.restart_with_clarification(
                        run,
                        agent,
                        tier,
                        &prompt_file,
                        &self.project_root,
                        self.monitor_config(),
                    )?;
                }
                self.events
                    .publish(Event::AgentStarted { run_id: run.run_id.clone(), agent });
                Ok(None)
            }
        }
    }

    /// Detect a pane whose child process has exited without leaving either
    /// `done.flag` or `error.flag` behind — the agent crashed rather than
    /// finishing or self-reporting. Synthesises a recoverable `crash`
    /// [`ErrorFlag`] so it flows through the same recovery path a
    /// self-reported error would (SPEC_FULL §4.4, §7, §8 scenario 4),
    /// instead of waiting out the full hard-deadline timeout to notice.
    async fn check_crashed_agents(
        &self,
        dir: &RunDirectory,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
        error_recovery: &mut ErrorRecoveryService,
        phase_machine: &PhaseMachine,
    ) -> SupervisorResult<Option<RunOutcome>> {
        for agent in run.running_agents() {
            if terminal.is_alive(agent).unwrap_or(true) {
                continue;
            }
            if dir.agent_done_flag(agent.as_str()).exists() || dir.agent_error_flag(agent.as_str()).exists() {
                continue;
            }
            let error = ErrorFlag::new(agent, ErrorKind::Crash, "agent process exited without a sentinel file", true);
            if let Some(outcome) = self
                .handle_agent_error(dir, store, run, terminal, monitor, streamer, error_recovery, phase_machine, agent, error)
                .await?
            {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    async fn handle_monitor_event(
        &self,
        dir: &RunDirectory,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
        error_recovery: &mut ErrorRecoveryService,
        phase_machine: &PhaseMachine,
        event: crate::terminal::MonitorEvent,
    ) -> SupervisorResult<Option<RunOutcome>> {
        use crate::terminal::MonitorEvent;
        match event {
            MonitorEvent::Stale { agent, inactive_for } => {
                self.events.publish(Event::AgentStale {
                    run_id: run.run_id.clone(),
                    agent,
                    inactive_ms: inactive_for.as_millis() as u64,
                });
                Ok(None)
            }
            MonitorEvent::Timeout { agent } => {
                self.events.publish(Event::AgentTimeout { run_id: run.run_id.clone(), agent });
                let error = ErrorFlag::new(agent, ErrorKind::Timeout, "agent monitor hard wall-time timeout", true);
                self.handle_agent_error(dir, store, run, terminal, monitor, streamer, error_recovery, phase_machine, agent, error)
                    .await
            }
        }
    }

    async fn handle_agent_error(
        &self,
        dir: &RunDirectory,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
        error_recovery: &mut ErrorRecoveryService,
        phase_machine: &PhaseMachine,
        agent: AgentName,
        error: ErrorFlag,
    ) -> SupervisorResult<Option<RunOutcome>> {
        self.events.publish(Event::AgentError {
            run_id: run.run_id.clone(),
            agent,
            error: error.clone(),
        });
        let still_producing = terminal.is_alive(agent).unwrap_or(false);
        let outcome = error_recovery.handle(&run.run_id, agent, &error, still_producing).await;
        remove_if_present(dir.agent_error_flag(agent.as_str())).ok();

        match outcome {
            ErrorOutcome::Recovered { action } => {
                self.events
                    .publish(Event::RecoveryAttempted { run_id: run.run_id.clone(), agent, action });
                match action {
                    RecoveryAction::Restart => {
                        let prompt_file = dir.prompt_file(agent.as_str());
                        let tier = run.selected_models.get(agent);
                        let mut lifecycle = AgentLifecycle::new(terminal, monitor, streamer, store);
                        lifecycle.restart_with_clarification(
                            run,
                            agent,
                            tier,
                            &prompt_file,
                            &self.project_root,
                            self.monitor_config(),
                        )?;
                        Ok(None)
                    }
                    RecoveryAction::ExtendTimeout => {
                        monitor.watch(agent, self.monitor_config());
                        Ok(None)
                    }
                    RecoveryAction::Skip => {
                        self.complete_and_route(dir, store, run, terminal, monitor, streamer, error_recovery, phase_machine, agent)
                            .await
                    }
                    RecoveryAction::Abort => self.fail_run(store, run, terminal, "recovery aborted after error"),
                }
            }
            ErrorOutcome::Skipped { reason } => {
                self.events
                    .publish(Event::RecoverySkipped { run_id: run.run_id.clone(), agent, reason: reason.clone() });
                self.fail_run(store, run, terminal, &reason)
            }
            ErrorOutcome::Aborted { cause } => self.fail_run(store, run, terminal, &cause),
        }
    }

    fn fail_run(
        &self,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        reason: &str,
    ) -> SupervisorResult<Option<RunOutcome>> {
        run.phase = RunPhase::Failed;
        store.save(run)?;
        self.events
            .publish(Event::RunFailed { run_id: run.run_id.clone(), reason: reason.to_string() });
        terminal.shutdown();
        Ok(Some(RunOutcome::Failed))
    }

    /// Mark `agent` completed, then route: Gatekeeper verdicts go through
    /// [`PhaseMachine::route_verdict`]; every other agent's completion goes
    /// through [`AgentCoordinator::decide`] (SPEC_FULL §4.12).
    async fn complete_and_route(
        &self,
        dir: &RunDirectory,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
        error_recovery: &mut ErrorRecoveryService,
        phase_machine: &PhaseMachine,
        agent: AgentName,
    ) -> SupervisorResult<Option<RunOutcome>> {
        {
            let mut lifecycle = AgentLifecycle::new(terminal, monitor, streamer, store);
            lifecycle.complete(run, agent)?;
        }
        // A clean completion closes the book on any earlier recovered
        // errors for this agent; don't let their attempt count linger and
        // count against a future, unrelated error (SPEC_FULL §4.7).
        error_recovery.reset_agent(agent);
        self.record_usage(store, run, terminal, agent)?;
        self.events.publish(Event::AgentDone { run_id: run.run_id.clone(), agent });

        if agent == AgentName::Gatekeeper {
            return self.route_gatekeeper_verdict(dir, store, run, terminal, monitor, streamer, phase_machine).await;
        }

        match AgentCoordinator::decide(dir, run.phase).map_err(|e| SupervisorError::io(dir.root(), e))? {
            CoordinatorAction::WaitForHuman { crp_id } => self.pause_for_human(store, run, Some(crp_id)).await,
            CoordinatorAction::Transition { next_phase, next_agent } => {
                self.transition(dir, store, run, terminal, monitor, streamer, phase_machine, next_phase, next_agent, false)
                    .await
            }
        }
    }

    /// Refresh usage for `agent` from its final pane scrollback, per
    /// SPEC_FULL §4.6 ("reads are refreshed at agent completion"). A missing
    /// or unparsable usage line just leaves this agent's usage at zero
    /// rather than failing the run.
    fn record_usage(
        &self,
        store: &StateStore,
        run: &mut Run,
        terminal: &TerminalController,
        agent: AgentName,
    ) -> SupervisorResult<()> {
        let Ok(capture) = terminal.capture_pane(agent, 500) else {
            return Ok(());
        };
        let Some(raw) = crate::usage::parse_pane_usage(&capture) else {
            return Ok(());
        };
        let tier = run.selected_models.get(agent);
        let cost_usd = self.usage_prices.cost_usd(tier, raw.input_tokens, raw.output_tokens);
        let usage = crate::run::Usage {
            input_tokens: raw.input_tokens,
            output_tokens: raw.output_tokens,
            cache_creation_tokens: raw.cache_creation_tokens,
            cache_read_tokens: raw.cache_read_tokens,
            cost_usd,
        };
        run.agent_mut(agent).usage = usage;
        run.usage.total_input_tokens += usage.input_tokens;
        run.usage.total_output_tokens += usage.output_tokens;
        run.usage.total_cache_creation_tokens += usage.cache_creation_tokens;
        run.usage.total_cache_read_tokens += usage.cache_read_tokens;
        run.usage.total_cost_usd += usage.cost_usd;
        store.save(run)?;
        Ok(())
    }

    async fn route_gatekeeper_verdict(
        &self,
        dir: &RunDirectory,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
        phase_machine: &PhaseMachine,
    ) -> SupervisorResult<Option<RunOutcome>> {
        let bytes = std::fs::read(dir.gatekeeper_verdict())
            .map_err(|e| SupervisorError::io(dir.gatekeeper_verdict(), e))?;
        let verdict: Verdict = serde_json::from_slice(&bytes)?;
        self.events
            .publish(Event::VerdictReceived { run_id: run.run_id.clone(), verdict: verdict.verdict });

        let route = phase_machine.route_verdict(
            verdict.verdict,
            run.iteration,
            run.max_iterations,
            run.minor_fix_attempts,
            self.config.max_minor_fix_attempts,
        );

        match route {
            VerdictRoute::MinorFixAtVerify => {
                run.minor_fix_attempts += 1;
                self.transition(
                    dir,
                    store,
                    run,
                    terminal,
                    monitor,
                    streamer,
                    phase_machine,
                    RunPhase::Verify,
                    Some(AgentName::Verifier),
                    true,
                )
                .await
            }
            VerdictRoute::Transition(RunPhase::Build) => {
                run.iteration += 1;
                run.minor_fix_attempts = 0;
                self.transition(
                    dir,
                    store,
                    run,
                    terminal,
                    monitor,
                    streamer,
                    phase_machine,
                    RunPhase::Build,
                    Some(AgentName::Builder),
                    true,
                )
                .await
            }
            VerdictRoute::Transition(RunPhase::ReadyForMerge) => {
                phase_machine.validate(run.phase, RunPhase::ReadyForMerge)?;
                run.phase = RunPhase::ReadyForMerge;
                store.save(run)?;
                self.write_mrp(dir, run)?;

                phase_machine.validate(RunPhase::ReadyForMerge, RunPhase::Completed)?;
                run.phase = RunPhase::Completed;
                store.save(run)?;
                self.events.publish(Event::RunCompleted { run_id: run.run_id.clone() });
                terminal.shutdown();
                Ok(Some(RunOutcome::Completed))
            }
            VerdictRoute::Transition(RunPhase::WaitingHuman) => self.pause_for_human(store, run, None).await,
            VerdictRoute::Transition(RunPhase::Failed) => Ok(self.fail_run(store, run, terminal, &verdict.reason)?),
            VerdictRoute::Transition(other) => {
                unreachable!("route_verdict never routes a gatekeeper verdict to {other}")
            }
        }
    }

    /// Move the run to `next_phase`, optionally starting `next_agent` with a
    /// freshly rendered prompt. `has_review` marks a retry/fix iteration so
    /// the rendered prompt can include prior review context.
    async fn transition(
        &self,
        dir: &RunDirectory,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
        phase_machine: &PhaseMachine,
        next_phase: RunPhase,
        next_agent: Option<AgentName>,
        has_review: bool,
    ) -> SupervisorResult<Option<RunOutcome>> {
        phase_machine.validate(run.phase, next_phase)?;
        self.events.publish(Event::PhaseTransitioned {
            run_id: run.run_id.clone(),
            from: run.phase,
            to: next_phase,
            iteration: run.iteration,
        });
        run.phase = next_phase;
        store.save(run)?;

        if let Some(agent) = next_agent {
            let prompt_file = self.render_agent_prompt(dir, run, agent, has_review, None, VerifierPhase::One)?;
            let tier = run.selected_models.get(agent);
            let mut lifecycle = AgentLifecycle::new(terminal, monitor, streamer, store);
            lifecycle.start(run, agent, tier, &prompt_file, &self.project_root, self.monitor_config())?;
            self.events.publish(Event::AgentStarted { run_id: run.run_id.clone(), agent });
        }
        Ok(None)
    }

    /// Pause the run at `waiting_human`, recording which phase it should
    /// resume into once a Human Resolution lands (SPEC_FULL §4.12, §4.15).
    async fn pause_for_human(
        &self,
        store: &StateStore,
        run: &mut Run,
        crp_id: Option<String>,
    ) -> SupervisorResult<Option<RunOutcome>> {
        let from = run.phase;
        PhaseMachine::new().validate(from, RunPhase::WaitingHuman)?;
        run.paused_from = Some(from);
        run.pending_crp = crp_id.clone();
        run.phase = RunPhase::WaitingHuman;
        store.save(run)?;
        if let Some(crp_id) = crp_id {
            self.events
                .publish(Event::WaitingForHuman { run_id: run.run_id.clone(), crp_id });
        }
        Ok(Some(RunOutcome::WaitingHuman))
    }

    /// Resolve a pending CRP via its matching VCR: transition back to the
    /// phase the run paused from and restart that phase's agent with the
    /// resolution folded into its prompt context.
    async fn resume_from_resolution(
        &self,
        dir: &RunDirectory,
        store: &StateStore,
        run: &mut Run,
        terminal: &mut TerminalController,
        monitor: &mut AgentMonitor,
        streamer: &mut OutputStreamer,
        phase_machine: &PhaseMachine,
        vcr_id: &str,
    ) -> SupervisorResult<Option<RunOutcome>> {
        let bytes = std::fs::read(dir.vcr_file(vcr_id)).map_err(|e| SupervisorError::io(dir.vcr_file(vcr_id), e))?;
        let resolution: HumanResolution = serde_json::from_slice(&bytes)?;

        let Some(resume_phase) = run.paused_from else {
            return Ok(None);
        };
        phase_machine.validate(RunPhase::WaitingHuman, resume_phase)?;
        self.events.publish(Event::PhaseTransitioned {
            run_id: run.run_id.clone(),
            from: RunPhase::WaitingHuman,
            to: resume_phase,
            iteration: run.iteration,
        });
        run.phase = resume_phase;
        run.pending_crp = None;
        run.paused_from = None;
        store.save(run)?;

        if let Some(agent) = AgentName::for_phase(resume_phase) {
            let prompt_file =
                self.render_agent_prompt(dir, run, agent, true, Some(resolution.decision.clone()), VerifierPhase::One)?;
            let tier = run.selected_models.get(agent);
            let mut lifecycle = AgentLifecycle::new(terminal, monitor, streamer, store);
            lifecycle.restart_with_clarification(
                run,
                agent,
                tier,
                &prompt_file,
                &self.project_root,
                self.monitor_config(),
            )?;
            self.events.publish(Event::AgentStarted { run_id: run.run_id.clone(), agent });
        }
        Ok(None)
    }
}

/// Scan `vcr/` for the Human Resolution whose `crp_id` matches `crp_id`.
fn find_matching_vcr(dir: &RunDirectory, crp_id: &str) -> std::io::Result<Option<String>> {
    let entries = match std::fs::read_dir(dir.vcr_dir()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".json") else {
            continue;
        };
        let bytes = std::fs::read(entry.path())?;
        let vcr: HumanResolution = serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if vcr.crp_id == crp_id {
            return Ok(Some(stem.to_string()));
        }
    }
    Ok(None)
}

/// Drives a single mission task's child run to completion, implementing
/// [`RunSpawner`] so `MissionManager::run_phase`/`run_task` can call into
/// the Orchestrator without depending on it directly (SPEC_FULL §4.16).
pub struct BlockingRunSpawner<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> BlockingRunSpawner<'a> {
    pub fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }
}

impl RunSpawner for BlockingRunSpawner<'_> {
    fn spawn_and_await(
        &mut self,
        briefing: &str,
        previous_context: Option<&str>,
    ) -> Result<(RunId, VerdictKind), String> {
        let full_briefing = match previous_context {
            Some(context) => format!("{context}\n\n---\n\n{briefing}"),
            None => briefing.to_string(),
        };

        // `MissionManager::run_phase` calls this synchronously; spin up a
        // fresh single-threaded runtime per task rather than assuming we can
        // `block_on` safely from whatever context the caller is already in.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| e.to_string())?;
        let (run_id, outcome) = rt
            .block_on(self.orchestrator.start_run(&full_briefing))
            .map_err(|e| e.to_string())?;

        let verdict = match outcome {
            RunOutcome::Completed => VerdictKind::Pass,
            RunOutcome::WaitingHuman => VerdictKind::NeedsHuman,
            RunOutcome::Failed | RunOutcome::Cancelled => VerdictKind::Fail,
        };
        Ok((run_id, verdict))
    }
}
