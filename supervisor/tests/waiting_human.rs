//! Scenario 3 (SPEC_FULL §8): an agent raises a clarification request
//! mid-run, the run pauses for human input, and resolving the CRP with a
//! VCR lets it resume to completion.

mod support;

use supervisor::orchestrator::{Orchestrator, RunOutcome};
use supervisor::run::dir::atomic_write;
use supervisor::run::{HumanResolution, RunDirectory};

#[tokio::test]
async fn raising_a_clarification_pauses_then_resumes_to_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let project_root = tmp.path();
    let config = support::fast_config();
    let app_dir_name = config.app_dir_name.clone();
    support::write_templates(project_root, &app_dir_name);
    support::write_plan(
        project_root,
        &serde_json::json!({
            "refiner": [
                {"action": "needs_human", "crp_id": "crp-001", "question": "which auth method?"},
                {"action": "done"},
            ],
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

    assert_eq!(outcome, RunOutcome::WaitingHuman);
    assert_eq!(outcome.exit_code(), 2);

    let dir = RunDirectory::new(project_root, &app_dir_name, &run_id);
    let resolution = HumanResolution {
        id: "vcr-001".to_string(),
        crp_id: "crp-001".to_string(),
        decision: "JWT".to_string(),
        rationale: Some("simplest fit for this service".to_string()),
        applies_to_future: false,
    };
    atomic_write(dir.vcr_file("vcr-001"), &serde_json::to_vec_pretty(&resolution).unwrap()).unwrap();

    let resumed = tokio::time::timeout(support::TEST_TIMEOUT, orchestrator.resume_run(&run_id))
        .await
        .expect("resume did not finish in time")
        .expect("resume errored");

    assert_eq!(resumed, RunOutcome::Completed);
}
