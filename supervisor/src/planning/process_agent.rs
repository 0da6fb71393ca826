//! Concrete `PlannerAgent`/`CriticAgent` that invoke the same kind of
//! external black-box executable as the four pipeline agents, but as a
//! one-shot process rather than a long-lived pane: the supervisor writes a
//! JSON request to the child's stdin and reads a JSON result from its
//! stdout, matching the agent invocation contract in SPEC_FULL §6
//! ("explicit argv ... agent expected to read sentinel inputs ... write
//! outputs") minus the scrollback/pty machinery a one-shot call doesn't
//! need.
//!
//! `PlannerAgent`/`CriticAgent` are infallible by trait signature (the
//! Planner/Critic loop has no retry budget of its own), so a process that
//! fails to spawn, exits non-zero, or writes unparsable output degrades to
//! a `needs_human` critique rather than panicking or silently approving.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use super::pipeline::{CriticAgent, PlannerAgent};
use super::types::{Critique, CritiqueItem, CritiqueStats, CritiqueTarget, CritiqueVerdict, PlanDraft, Severity};

#[derive(Debug, Serialize)]
struct DraftRequest<'a> {
    description: &'a str,
    revision_instructions: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CritiqueRequest<'a> {
    draft: &'a PlanDraft,
    history: &'a [Critique],
}

fn run_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
    command: &str,
    args: &[&str],
    workdir: &PathBuf,
    request: &Req,
) -> Result<Resp, String> {
    let mut child = Command::new(command)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn {command}: {e}"))?;

    let payload = serde_json::to_vec(request).map_err(|e| format!("failed to encode request: {e}"))?;
    child
        .stdin
        .take()
        .ok_or_else(|| "child stdin unavailable".to_string())?
        .write_all(&payload)
        .map_err(|e| format!("failed to write request: {e}"))?;

    let output = child
        .wait_with_output()
        .map_err(|e| format!("failed waiting for {command}: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "{command} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    serde_json::from_slice(&output.stdout).map_err(|e| format!("failed to parse {command} output: {e}"))
}

fn needs_human_critique(reason: String) -> Critique {
    let items = vec![CritiqueItem {
        id: "planner-critic-process-failure".to_string(),
        severity: Severity::Critical,
        category: "process".to_string(),
        target: CritiqueTarget { kind: "global".to_string(), id: None },
        title: "planner/critic process failed".to_string(),
        description: reason,
        suggestion: None,
    }];
    Critique {
        version: 0,
        verdict: CritiqueVerdict::NeedsHuman,
        stats: CritiqueStats::from_items(&items),
        items,
    }
}

/// Spawns `command --mode plan` per round, piping a `{description,
/// revision_instructions}` request on stdin and expecting a [`PlanDraft`] on
/// stdout.
pub struct ProcessPlannerAgent {
    command: String,
    workdir: PathBuf,
    last_error: Option<String>,
}

impl ProcessPlannerAgent {
    pub fn new(command: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.into(),
            last_error: None,
        }
    }

    /// The most recent process failure, if the last `draft` call degraded
    /// silently (trait signature has no room for an error return).
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl PlannerAgent for ProcessPlannerAgent {
    fn draft(&mut self, description: &str, revision_instructions: Option<&str>) -> PlanDraft {
        let request = DraftRequest { description, revision_instructions };
        match run_json(&self.command, &["--mode", "plan"], &self.workdir, &request) {
            Ok(draft) => {
                self.last_error = None;
                draft
            }
            Err(e) => {
                self.last_error = Some(e);
                PlanDraft { version: 0, phases: serde_json::json!([]) }
            }
        }
    }
}

/// Spawns `command --mode critique` per round, piping a `{draft, history}`
/// request on stdin and expecting a [`Critique`] on stdout.
pub struct ProcessCriticAgent {
    command: String,
    workdir: PathBuf,
}

impl ProcessCriticAgent {
    pub fn new(command: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self { command: command.into(), workdir: workdir.into() }
    }
}

impl CriticAgent for ProcessCriticAgent {
    fn critique(&mut self, draft: &PlanDraft, history: &[Critique]) -> Critique {
        let request = CritiqueRequest { draft, history };
        match run_json(&self.command, &["--mode", "critique"], &self.workdir, &request) {
            Ok(critique) => critique,
            Err(e) => needs_human_critique(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_degrades_planner_to_empty_draft_with_recorded_error() {
        let mut planner = ProcessPlannerAgent::new("/nonexistent/planner-binary", ".");
        let draft = planner.draft("do something", None);
        assert_eq!(draft.version, 0);
        assert!(planner.last_error().is_some());
    }

    #[test]
    fn missing_executable_degrades_critic_to_needs_human() {
        let mut critic = ProcessCriticAgent::new("/nonexistent/critic-binary", ".");
        let draft = PlanDraft { version: 1, phases: serde_json::json!([]) };
        let critique = critic.critique(&draft, &[]);
        assert_eq!(critique.verdict, CritiqueVerdict::NeedsHuman);
        assert_eq!(critique.stats.critical, 1);
    }
}
