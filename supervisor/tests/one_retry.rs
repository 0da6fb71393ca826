//! Scenario 2 (SPEC_FULL §8): Builder fails once with a recoverable
//! validation error, the error-recovery path restarts it deterministically
//! (`ValidationStrategy` always recommends `Restart`), and the run still
//! completes.

mod support;

use supervisor::orchestrator::{Orchestrator, RunOutcome};

#[tokio::test]
async fn validation_error_is_recovered_and_run_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let project_root = tmp.path();
    let config = support::fast_config();
    support::write_templates(project_root, &config.app_dir_name);
    support::write_plan(
        project_root,
        &serde_json::json!({
            "refiner": [{"action": "done"}],
            "builder": [
                {"action": "error", "kind": "validation", "message": "manifest missing a field", "recoverable": true},
                {"action": "done"},
            ],
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
