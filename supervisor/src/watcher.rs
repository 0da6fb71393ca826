//! FileWatcher: observes sentinel files in a run directory and emits typed
//! events (SPEC_FULL §4.2).
//!
//! Grounded in the teacher's `events/bus.rs` event-coalescing discussion;
//! uses the `notify` crate the way the pack's filesystem-traversal crates
//! (`ignore`) are used elsewhere — a thin, narrowly-scoped wrapper rather
//! than exposing `notify`'s raw event type to callers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use crate::run::{AgentName, ErrorFlag};

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Done { agent: AgentName },
    Error { agent: AgentName, error: ErrorFlag },
    CrpCreated { crp_id: String, created_by: AgentName },
    VcrCreated { vcr_id: String, crp_id: String },
    TestsReady { agent: AgentName },
    TestOutput { agent: AgentName },
}

/// How long a duplicate sentinel notification is suppressed for (SPEC_FULL
/// §4.2: "debounced, coalesce duplicates within 100ms").
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Retry window for a sentinel JSON file that is present but not yet fully
/// written (SPEC_FULL §4.2).
const PARSE_RETRY_WINDOW: Duration = Duration::from_millis(500);

/// Watches a run directory and turns raw filesystem notifications into
/// [`WatchEvent`]s on `tokio::sync::mpsc` channel, debounced per path.
pub struct FileWatcher {
    _inner: notify::RecommendedWatcher,
    last_seen: HashMap<PathBuf, Instant>,
}

impl FileWatcher {
    /// Start watching `run_dir`, sending decoded events to `tx`. Raw
    /// `notify` events are translated on a background thread (notify's
    /// callback runs off the async runtime) and forwarded through a sync
    /// channel bridged into the async one.
    pub fn start(run_dir: &Path, tx: mpsc::UnboundedSender<WatchEvent>) -> notify::Result<Self> {
        let run_dir_owned = run_dir.to_path_buf();
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })?;
        watcher.watch(run_dir, RecursiveMode::Recursive)?;

        std::thread::spawn(move || {
            let mut last_seen: HashMap<PathBuf, Instant> = HashMap::new();
            for event in raw_rx {
                for path in &event.paths {
                    if debounced(&mut last_seen, path) {
                        continue;
                    }
                    if let Some(decoded) = decode(&run_dir_owned, path) {
                        if tx.send(decoded).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Self {
            _inner: watcher,
            last_seen: HashMap::new(),
        })
    }
}

fn debounced(last_seen: &mut HashMap<PathBuf, Instant>, path: &Path) -> bool {
    let now = Instant::now();
    if let Some(prev) = last_seen.get(path) {
        if now.duration_since(*prev) < DEBOUNCE_WINDOW {
            return true;
        }
    }
    last_seen.insert(path.to_path_buf(), now);
    false
}

/// Parse a JSON sentinel with the retry window SPEC_FULL §4.2 requires for
/// partial writes, since a sibling rename may still be landing the file's
/// final bytes.
pub fn read_json_with_retry<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, std::io::Error> {
    let deadline = Instant::now() + PARSE_RETRY_WINDOW;
    loop {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if Instant::now() >= deadline {
                        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
            },
            Err(e) => return Err(e),
        }
    }
}

fn decode(run_dir: &Path, path: &Path) -> Option<WatchEvent> {
    let rel = path.strip_prefix(run_dir).ok()?;
    let mut components = rel.components();
    let first = components.next()?.as_os_str().to_str()?;
    let file_name = path.file_name()?.to_str()?;

    let agent = match first {
        "refiner" => Some(AgentName::Refiner),
        "builder" => Some(AgentName::Builder),
        "verifier" => Some(AgentName::Verifier),
        "gatekeeper" => Some(AgentName::Gatekeeper),
        _ => None,
    };

    if let Some(agent) = agent {
        match file_name {
            "done.flag" => return Some(WatchEvent::Done { agent }),
            "error.flag" => {
                return match read_json_with_retry::<ErrorFlag>(path) {
                    Ok(error) => Some(WatchEvent::Error { agent, error }),
                    Err(e) => {
                        warn!(?path, error = %e, "failed to parse error.flag");
                        None
                    }
                }
            }
            "tests-ready.flag" => return Some(WatchEvent::TestsReady { agent }),
            "test-output.json" => return Some(WatchEvent::TestOutput { agent }),
            _ => return None,
        }
    }

    if first == "crp" && file_name.ends_with(".json") {
        let crp_id = file_name.trim_end_matches(".json").to_string();
        return match read_json_with_retry::<crate::run::ClarificationRequest>(path) {
            Ok(crp) => Some(WatchEvent::CrpCreated {
                crp_id,
                created_by: crp.created_by,
            }),
            Err(e) => {
                warn!(?path, error = %e, "failed to parse crp file");
                None
            }
        };
    }

    if first == "vcr" && file_name.ends_with(".json") {
        let vcr_id = file_name.trim_end_matches(".json").to_string();
        return match read_json_with_retry::<crate::run::HumanResolution>(path) {
            Ok(vcr) => Some(WatchEvent::VcrCreated {
                vcr_id,
                crp_id: vcr.crp_id,
            }),
            Err(e) => {
                warn!(?path, error = %e, "failed to parse vcr file");
                None
            }
        };
    }

    None
}
