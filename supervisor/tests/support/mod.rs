//! Shared fixtures for the end-to-end Orchestrator scenarios (SPEC_FULL
//! §8): a fast `SupervisorConfig` pointed at the `fake_agent` binary, plus
//! helpers to stage the template and plan files a run needs before
//! `Orchestrator::start_run` can be called. Grounded in
//! `tests/support/pty_harness.rs`'s `CARGO_BIN_EXE_*` convention.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use supervisor::config::SupervisorConfig;
use supervisor::model_selector::SelectionStrategy;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn fake_agent_path() -> String {
    std::env::var("CARGO_BIN_EXE_fake_agent")
        .expect("cargo sets CARGO_BIN_EXE_fake_agent for integration tests in this crate")
}

/// A config tuned to drive the whole pipeline in well under
/// [`TEST_TIMEOUT`]: short probe/poll/backoff intervals, agent_command
/// pointed at the fake agent, deterministic model selection.
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        agent_command: fake_agent_path(),
        dynamic_model_selection: false,
        selection_strategy: SelectionStrategy::Balanced,
        auto_retry_enabled: true,
        retry_max_attempts: 3,
        retry_base_ms: 1,
        retry_multiplier: 1.0,
        retry_cap_ms: 5,
        max_wall_time_secs: 60,
        max_inactivity_secs: 60,
        probe_interval_secs: 1,
        min_poll_interval_ms: 50,
        max_poll_interval_ms: 200,
        two_phase_verifier: false,
        ..SupervisorConfig::default()
    }
}

/// Stub prompt templates for every agent; the fake agent never reads
/// these, but `Orchestrator::start_run` renders all four before the first
/// agent starts and fails if they're missing.
pub fn write_templates(project_root: &Path, app_dir_name: &str) {
    let templates_dir = project_root.join(format!(".{app_dir_name}")).join("templates");
    std::fs::create_dir_all(&templates_dir).unwrap();
    for agent in ["refiner", "builder", "verifier", "gatekeeper"] {
        std::fs::write(templates_dir.join(format!("{agent}.md")), "stub prompt\n").unwrap();
    }
}

pub fn write_plan(project_root: &Path, plan: &serde_json::Value) {
    let bytes = serde_json::to_vec_pretty(plan).unwrap();
    std::fs::write(project_root.join("fake-agent-plan.json"), bytes).unwrap();
}
