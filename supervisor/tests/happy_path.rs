//! Scenario 1 (SPEC_FULL §8): every agent succeeds on its first attempt,
//! end to end through Refiner -> Builder -> Verifier -> Gatekeeper.

mod support;

use supervisor::orchestrator::{Orchestrator, RunOutcome};

#[tokio::test]
async fn happy_path_completes_through_all_four_agents() {
    let tmp = tempfile::tempdir().unwrap();
    let project_root = tmp.path();
    let config = support::fast_config();
    support::write_templates(project_root, &config.app_dir_name);
    support::write_plan(
        project_root,
        &serde_json::json!({
            "refiner": [{"action": "done"}],
            "builder": [{"action": "done"}],
            "verifier": [{"action": "done"}],
            "gatekeeper": [{"action": "verdict", "verdict": "PASS", "reason": "looks good"}],
        }),
    );

    let orchestrator = Orchestrator::new(project_root, config);
    let (run_id, outcome) = tokio::time::timeout(support::TEST_TIMEOUT, orchestrator.start_run("ship the feature"))
        .await
        .expect("run did not finish in time")
        .expect("run errored");

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(outcome.exit_code(), 0);
    assert!(run_id.starts_with("run-"));
    assert!(project_root.join(".supervisor/runs").join(&run_id).join("mrp/summary.md").is_file());
}
