//! Scenario 4 (SPEC_FULL §8): the Builder's process exits without leaving
//! a sentinel file behind. `check_crashed_agents` notices on the next
//! probe tick, synthesises a recoverable `crash` error, and
//! `CrashStrategy` deterministically restarts it.

mod support;

use supervisor::orchestrator::{Orchestrator, RunOutcome};

#[tokio::test]
async fn crashed_agent_is_detected_and_restarted() {
    let tmp = tempfile::tempdir().unwrap();
    let project_root = tmp.path();
    let config = support::fast_config();
    support::write_templates(project_root, &config.app_dir_name);
    support::write_plan(
        project_root,
        &serde_json::json!({
            "refiner": [{"action": "done"}],
            "builder": [{"action": "crash"}, {"action": "done"}],
            "verifier": [{"action": "done"}],
            "gatekeeper": [{"action": "verdict", "verdict": "PASS", "reason": "looks good"}],
        }),
    );

    let orchestrator = Orchestrator::new(project_root, config);
    let (_run_id, outcome) = tokio::time::timeout(support::TEST_TIMEOUT, orchestrator.start_run("ship the feature"))
        .await
        .expect("run did not finish in time")
        .expect("run errored");

    assert_eq!(outcome, RunOutcome::Completed);
}
