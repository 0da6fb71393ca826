//! Run directory layout and the atomic write discipline shared by every
//! component that persists into it (SPEC_FULL §4.1, §6).
//!
//! Grounded in the teacher's "write tmp + rename" discussion in its own
//! Design Notes and in `harness/git_manager.rs`'s habit of wrapping every
//! filesystem side effect behind a narrow, named method rather than ad-hoc
//! `std::fs` calls scattered through call sites.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use super::types::RunId;

/// All paths that make up a single run's working directory.
///
/// Agents and the supervisor agree on this layout byte-for-byte (SPEC_FULL
/// §6); nothing here is a free choice.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// `<project>/.<app>/runs/<runId>/`.
    pub fn new(project_root: impl AsRef<Path>, app_dir_name: &str, run_id: &RunId) -> Self {
        let root = project_root
            .as_ref()
            .join(format!(".{app_dir_name}"))
            .join("runs")
            .join(run_id);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_json(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn briefing_dir(&self) -> PathBuf {
        self.root.join("briefing")
    }

    pub fn briefing_raw(&self) -> PathBuf {
        self.briefing_dir().join("raw.md")
    }

    pub fn briefing_refined(&self) -> PathBuf {
        self.briefing_dir().join("refined.md")
    }

    pub fn briefing_clarifications(&self) -> PathBuf {
        self.briefing_dir().join("clarifications.json")
    }

    pub fn briefing_log(&self) -> PathBuf {
        self.briefing_dir().join("log.md")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join("prompts")
    }

    pub fn prompt_file(&self, agent: &str) -> PathBuf {
        self.prompts_dir().join(format!("{agent}.md"))
    }

    pub fn crp_dir(&self) -> PathBuf {
        self.root.join("crp")
    }

    pub fn crp_file(&self, crp_id: &str) -> PathBuf {
        self.crp_dir().join(format!("{crp_id}.json"))
    }

    pub fn vcr_dir(&self) -> PathBuf {
        self.root.join("vcr")
    }

    pub fn vcr_file(&self, vcr_id: &str) -> PathBuf {
        self.vcr_dir().join(format!("{vcr_id}.json"))
    }

    pub fn agent_dir(&self, agent: &str) -> PathBuf {
        self.root.join(agent)
    }

    pub fn agent_log(&self, agent: &str) -> PathBuf {
        self.agent_dir(agent).join("log.md")
    }

    pub fn agent_done_flag(&self, agent: &str) -> PathBuf {
        self.agent_dir(agent).join("done.flag")
    }

    pub fn agent_error_flag(&self, agent: &str) -> PathBuf {
        self.agent_dir(agent).join("error.flag")
    }

    pub fn builder_manifest(&self) -> PathBuf {
        self.agent_dir("builder").join("output").join("manifest.json")
    }

    pub fn verifier_tests_dir(&self) -> PathBuf {
        self.agent_dir("verifier").join("tests")
    }

    pub fn verifier_results(&self) -> PathBuf {
        self.agent_dir("verifier").join("results.json")
    }

    pub fn verifier_tests_ready_flag(&self) -> PathBuf {
        self.agent_dir("verifier").join("tests-ready.flag")
    }

    pub fn verifier_test_config(&self) -> PathBuf {
        self.agent_dir("verifier").join("test-config.json")
    }

    pub fn verifier_test_output(&self) -> PathBuf {
        self.agent_dir("verifier").join("test-output.json")
    }

    pub fn verifier_test_log(&self) -> PathBuf {
        self.agent_dir("verifier").join("test-log.txt")
    }

    pub fn gatekeeper_review(&self) -> PathBuf {
        self.agent_dir("gatekeeper").join("review.md")
    }

    pub fn gatekeeper_verdict(&self) -> PathBuf {
        self.agent_dir("gatekeeper").join("verdict.json")
    }

    pub fn mrp_dir(&self) -> PathBuf {
        self.root.join("mrp")
    }

    pub fn mrp_summary(&self) -> PathBuf {
        self.mrp_dir().join("summary.md")
    }

    pub fn mrp_evidence(&self) -> PathBuf {
        self.mrp_dir().join("evidence.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn events_log(&self) -> PathBuf {
        self.logs_dir().join("events.log")
    }

    /// Create every subtree in the layout. Idempotent.
    pub fn ensure_created(&self) -> std::io::Result<()> {
        for dir in [
            self.root.clone(),
            self.briefing_dir(),
            self.prompts_dir(),
            self.crp_dir(),
            self.vcr_dir(),
            self.root.join("mrp"),
            self.root.join("logs"),
            self.agent_dir("refiner"),
            self.agent_dir("builder"),
            self.agent_dir("builder").join("output"),
            self.agent_dir("verifier"),
            self.verifier_tests_dir(),
            self.agent_dir("gatekeeper"),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Write `contents` to `path` atomically: write to `path.tmp`, fsync, then
/// rename over the destination. A concurrent reader observes either the
/// previous file or the complete new one, never a truncated write
/// (SPEC_FULL §8, testable property 7).
pub fn atomic_write(path: impl AsRef<Path>, contents: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(contents)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Rename a sentinel file into place after a temp-file write, matching the
/// agent-side contract in SPEC_FULL §5 ("agents write sentinel files last").
/// Here it is used by the supervisor itself when it originates a sentinel
/// (e.g. clearing an `error.flag` after handling it).
pub fn remove_if_present(path: impl AsRef<Path>) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn layout_matches_spec_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let run_id = crate::run::types::new_run_id(Utc::now());
        let dir = RunDirectory::new(tmp.path(), "supervisor", &run_id);
        assert!(dir.root().ends_with(format!(".supervisor/runs/{run_id}")));
        assert_eq!(dir.agent_error_flag("builder").file_name().unwrap(), "error.flag");
        assert_eq!(dir.builder_manifest().file_name().unwrap(), "manifest.json");
    }

    #[test]
    fn ensure_created_makes_every_subtree() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = RunDirectory::new(tmp.path(), "supervisor", &"run-20260727000000".to_string());
        dir.ensure_created().unwrap();
        assert!(dir.briefing_dir().is_dir());
        assert!(dir.crp_dir().is_dir());
        assert!(dir.verifier_tests_dir().is_dir());
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("state.json");
        atomic_write(&target, b"{}").unwrap();
        assert!(target.is_file());
        assert!(!tmp_path_for(&target).exists());
        assert_eq!(fs::read(&target).unwrap(), b"{}");
    }

    #[test]
    fn atomic_write_overwrite_keeps_new_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("state.json");
        atomic_write(&target, b"{\"a\":1}").unwrap();
        atomic_write(&target, b"{\"a\":2}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{\"a\":2}");
    }

    #[test]
    fn remove_if_present_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("error.flag");
        remove_if_present(&target).unwrap();
        atomic_write(&target, b"{}").unwrap();
        remove_if_present(&target).unwrap();
        assert!(!target.exists());
        remove_if_present(&target).unwrap();
    }
}
