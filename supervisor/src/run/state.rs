//! Persisted `state.json`: the single source of truth for a run.
//!
//! Grounded in the teacher's `state/store.rs::StateStore`, but the RocksDB
//! column-family backend is replaced with the atomic file discipline in
//! `run::dir` — the spec's bit-exact external-process contract rules out an
//! opaque embedded store. The error taxonomy (`StoreError`) keeps the
//! teacher's shape: one variant per failure mode, `#[from]` conversions
//! where the underlying error already has a standard type.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::dir::{atomic_write, RunDirectory};
use super::types::Run;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error reading/writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state.json at {path}: {source}")]
    Deserialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("no run found at {0}")]
    NotFound(PathBuf),
}

/// Loads and saves a run's `state.json`, enforcing the single-writer
/// discipline described in SPEC_FULL §4.1: only the Orchestrator calls
/// `save`; every other component only calls `load`.
pub struct StateStore {
    dir: RunDirectory,
}

impl StateStore {
    pub fn new(dir: RunDirectory) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &RunDirectory {
        &self.dir
    }

    /// Load `state.json`. Absence of the file is not an error — it means
    /// "no state yet" and the caller should treat the run as freshly
    /// allocated; only a present-but-unreadable file is fatal.
    pub fn load(&self) -> Result<Option<Run>, StoreError> {
        let path = self.dir.state_json();
        match std::fs::read(&path) {
            Ok(bytes) => {
                let run: Run = serde_json::from_slice(&bytes).map_err(|source| {
                    StoreError::Deserialization {
                        path: path.clone(),
                        source,
                    }
                })?;
                Ok(Some(run))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Load and require the run to already exist, surfacing `NotFound`
    /// rather than `None` — used by read paths that only make sense against
    /// an existing run (CLI `recover`, mission task polling).
    pub fn load_required(&self) -> Result<Run, StoreError> {
        self.load()?.ok_or_else(|| StoreError::NotFound(self.dir.state_json()))
    }

    /// Persist `run`, bumping `updated_at` and writing atomically
    /// (write-tmp-fsync-rename, per `run::dir::atomic_write`). Previously
    /// unknown fields round-trip through `serde_json::Value` untouched
    /// because `Run`'s nested structs derive `Deserialize`/`Serialize`
    /// symmetrically; callers that need forward-compat with a future schema
    /// version should route unknown top-level keys through
    /// `#[serde(flatten)]` extension points if/when SPEC_FULL's schema
    /// grows one.
    pub fn save(&self, run: &mut Run) -> Result<(), StoreError> {
        run.touch();
        let bytes = serde_json::to_vec_pretty(run).map_err(StoreError::Serialization)?;
        atomic_write(self.dir.state_json(), &bytes).map_err(|source| StoreError::Io {
            path: self.dir.state_json(),
            source,
        })
    }

    /// List run ids present under `<project>/.<app>/runs/`, for `recover
    /// --list`.
    pub fn list_run_ids(runs_root: impl AsRef<Path>) -> Result<Vec<String>, StoreError> {
        let runs_root = runs_root.as_ref();
        let entries = match std::fs::read_dir(runs_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: runs_root.to_path_buf(),
                    source,
                })
            }
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: runs_root.to_path_buf(),
                source,
            })?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::types::new_run_id;
    use chrono::Utc;

    fn store_in(tmp: &Path) -> (StateStore, String) {
        let run_id = new_run_id(Utc::now());
        let dir = RunDirectory::new(tmp, "supervisor", &run_id);
        dir.ensure_created().unwrap();
        (StateStore::new(dir), run_id)
    }

    #[test]
    fn load_of_absent_state_is_none_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, _) = store_in(tmp.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips_up_to_updated_at() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, run_id) = store_in(tmp.path());
        let mut run = Run::new(run_id.clone(), 3);
        let created_at = run.created_at;
        store.save(&mut run).unwrap();

        let loaded = store.load().unwrap().expect("state.json should exist");
        assert_eq!(loaded.run_id, run_id);
        assert_eq!(loaded.created_at, created_at);
        assert_eq!(loaded.phase, run.phase);
        assert_eq!(loaded.iteration, run.iteration);
    }

    #[test]
    fn save_bumps_updated_at() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, run_id) = store_in(tmp.path());
        let mut run = Run::new(run_id, 3);
        let before = run.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save(&mut run).unwrap();
        assert!(run.updated_at >= before);
    }

    #[test]
    fn load_required_surfaces_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, _) = store_in(tmp.path());
        let err = store.load_required().unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn list_run_ids_is_empty_for_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        assert!(StateStore::list_run_ids(&missing).unwrap().is_empty());
    }

    #[test]
    fn list_run_ids_lists_directories_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let runs_root = tmp.path().join(".supervisor").join("runs");
        std::fs::create_dir_all(runs_root.join("run-20260101000000")).unwrap();
        std::fs::create_dir_all(runs_root.join("run-20260101000001")).unwrap();
        let ids = StateStore::list_run_ids(&runs_root).unwrap();
        assert_eq!(ids, vec!["run-20260101000000", "run-20260101000001"]);
    }
}
