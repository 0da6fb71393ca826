//! fake_agent: a stand-in for the real agent executable, driven by a JSON
//! plan file instead of doing any actual work. Exists only so
//! `supervisor/tests/` can exercise the real `Orchestrator` driver loop
//! against a real child process and real sentinel files, without shelling
//! out to an LLM-backed agent (grounded in
//! `tests/support/pty_harness.rs`'s `CARGO_BIN_EXE_*` pattern).
//!
//! Invoked exactly as `TerminalController::start_agent` invokes a real
//! agent: `fake_agent --prompt-file <path> --model <tier>`, cwd set to the
//! run's project root. The agent name and run directory are both derived
//! from `--prompt-file` (`<run_dir>/prompts/<agent>.md`), so no extra flags
//! are needed.
//!
//! The plan lives at `<project_root>/fake-agent-plan.json`, a map from
//! agent name to a list of [`Action`]s. Each invocation of a given agent
//! consumes the next action in its list (clamped to the last one once
//! exhausted, so a single-entry list repeats forever); a `<run_dir>/.
//! <agent>.invocations` counter file tracks how many times that agent has
//! been invoked so far in this run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use supervisor::run::dir::atomic_write;
use supervisor::run::{AgentName, ClarificationRequest, ErrorFlag, ErrorKind, Verdict, VerdictKind};

#[derive(Parser)]
struct Args {
    #[arg(long)]
    prompt_file: PathBuf,
    #[arg(long)]
    model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    Done,
    Crash,
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default = "default_recoverable")]
        recoverable: bool,
    },
    NeedsHuman {
        crp_id: String,
        question: String,
    },
    Verdict {
        verdict: VerdictKind,
        reason: String,
    },
}

fn default_recoverable() -> bool {
    true
}

fn main() {
    let args = Args::parse();
    let _ = &args.model;

    let agent_str = args
        .prompt_file
        .file_stem()
        .and_then(|s| s.to_str())
        .expect("prompt file name carries the agent name")
        .to_string();
    let agent = parse_agent(&agent_str);

    let run_dir = args
        .prompt_file
        .parent()
        .and_then(Path::parent)
        .expect("prompt file lives at <run_dir>/prompts/<agent>.md")
        .to_path_buf();

    let project_root = std::env::current_dir().expect("cwd is set to the project root");
    let plan_path = project_root.join("fake-agent-plan.json");
    let plan: HashMap<String, Vec<Action>> = std::fs::read_to_string(&plan_path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();

    let actions = plan.get(&agent_str).cloned().unwrap_or(vec![Action::Done]);
    let invocation = next_invocation(&run_dir, &agent_str);
    let index = invocation.min(actions.len().saturating_sub(1));
    let action = actions[index].clone();

    run_action(&run_dir, agent, action);
}

fn parse_agent(name: &str) -> AgentName {
    match name {
        "refiner" => AgentName::Refiner,
        "builder" => AgentName::Builder,
        "verifier" => AgentName::Verifier,
        "gatekeeper" => AgentName::Gatekeeper,
        other => panic!("unknown agent in prompt file name: {other}"),
    }
}

/// Returns this invocation's zero-based index for `agent` and bumps the
/// counter file for next time.
fn next_invocation(run_dir: &Path, agent_str: &str) -> usize {
    let counter_path = run_dir.join(format!(".{agent_str}.invocations"));
    let current: usize = std::fs::read_to_string(&counter_path)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(0);
    let _ = std::fs::write(&counter_path, (current + 1).to_string());
    current
}

fn run_action(run_dir: &Path, agent: AgentName, action: Action) {
    let agent_str = agent.as_str();
    match action {
        Action::Done => {
            atomic_write(run_dir.join(agent_str).join("done.flag"), b"").expect("write done.flag");
        }
        Action::Crash => {
            std::process::exit(1);
        }
        Action::Error { kind, message, recoverable } => {
            let error = ErrorFlag::new(agent, kind, message, recoverable);
            let bytes = serde_json::to_vec_pretty(&error).expect("serialize error.flag");
            atomic_write(run_dir.join(agent_str).join("error.flag"), &bytes).expect("write error.flag");
        }
        Action::NeedsHuman { crp_id, question } => {
            let crp = ClarificationRequest::new(crp_id.clone(), agent, "question", question);
            let bytes = serde_json::to_vec_pretty(&crp).expect("serialize clarification request");
            atomic_write(run_dir.join("crp").join(format!("{crp_id}.json")), &bytes).expect("write crp");
            // Stay alive until the supervisor kills this pane after pausing
            // for human input; exiting here would look like a crash.
            loop {
                std::thread::sleep(std::time::Duration::from_secs(3600));
            }
        }
        Action::Verdict { verdict, reason } => {
            let verdict = Verdict {
                verdict,
                reason,
                issues: Vec::new(),
                carry_forward: None,
                timestamp: chrono::Utc::now(),
            };
            let bytes = serde_json::to_vec_pretty(&verdict).expect("serialize verdict");
            atomic_write(run_dir.join(agent_str).join("verdict.json"), &bytes).expect("write verdict.json");
            atomic_write(run_dir.join(agent_str).join("done.flag"), b"").expect("write done.flag");
        }
    }
}
