//! SupervisorConfig: loaded from `supervisor.toml` with environment
//! overrides (SPEC_FULL §2.1, ambient).
//!
//! Modelled on the teacher's single-deserialized-struct convention rather
//! than a multi-source layered config crate: `toml` + `serde` directly,
//! since that is already a teacher dependency and matches its own
//! `config.rs` shape in the `swarm-agents` member (before it was trimmed).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model_selector::SelectionStrategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub app_dir_name: String,
    pub agent_command: String,
    pub max_iterations: u32,
    pub max_minor_fix_attempts: u32,
    pub dynamic_model_selection: bool,
    pub selection_strategy: SelectionStrategy,
    pub auto_retry_enabled: bool,
    pub retry_max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_multiplier: f64,
    pub retry_cap_ms: u64,
    pub max_wall_time_secs: u64,
    pub max_inactivity_secs: u64,
    pub probe_interval_secs: u64,
    pub min_poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub two_phase_verifier: bool,
    pub convergence_threshold: f64,
    pub planning_max_iterations: u32,
    pub auto_approve_max_minor: u32,
    pub max_briefing_length: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            app_dir_name: "supervisor".to_string(),
            agent_command: "agent".to_string(),
            max_iterations: 3,
            max_minor_fix_attempts: 1,
            dynamic_model_selection: true,
            selection_strategy: SelectionStrategy::Balanced,
            auto_retry_enabled: true,
            retry_max_attempts: 3,
            retry_base_ms: 500,
            retry_multiplier: 2.0,
            retry_cap_ms: 30_000,
            max_wall_time_secs: 30 * 60,
            max_inactivity_secs: 2 * 60,
            probe_interval_secs: 30,
            min_poll_interval_ms: 250,
            max_poll_interval_ms: 4_000,
            two_phase_verifier: false,
            convergence_threshold: 0.7,
            planning_max_iterations: 2,
            auto_approve_max_minor: 3,
            max_briefing_length: 50_000,
        }
    }
}

impl SupervisorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(_) => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Environment overrides use the prefix `SUPERVISOR_` (e.g.
    /// `SUPERVISOR_MAX_ITERATIONS=5`), matching the teacher's convention of
    /// env-overriding individual tunables ahead of `main()` constructing the
    /// Orchestrator.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("SUPERVISOR_MAX_ITERATIONS") {
            if let Ok(parsed) = value.parse() {
                self.max_iterations = parsed;
            }
        }
        if let Ok(value) = std::env::var("SUPERVISOR_AGENT_COMMAND") {
            self.agent_command = value;
        }
        if let Ok(value) = std::env::var("SUPERVISOR_DYNAMIC_MODEL_SELECTION") {
            if let Ok(parsed) = value.parse() {
                self.dynamic_model_selection = parsed;
            }
        }
        if let Ok(value) = std::env::var("SUPERVISOR_AUTO_RETRY_ENABLED") {
            if let Ok(parsed) = value.parse() {
                self.auto_retry_enabled = parsed;
            }
        }
    }

    pub fn max_wall_time(&self) -> Duration {
        Duration::from_secs(self.max_wall_time_secs)
    }

    pub fn max_inactivity(&self) -> Duration {
        Duration::from_secs(self.max_inactivity_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = SupervisorConfig::default();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.planning_max_iterations, 2);
        assert_eq!(config.convergence_threshold, 0.7);
        assert_eq!(config.auto_approve_max_minor, 3);
    }

    #[test]
    fn load_parses_a_minimal_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("supervisor.toml");
        std::fs::write(&path, "max_iterations = 5\nagent_command = \"my-agent\"\n").unwrap();
        let config = SupervisorConfig::load(&path).unwrap();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.agent_command, "my-agent");
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let config = SupervisorConfig::load_or_default(Path::new("/nonexistent/supervisor.toml"));
        assert_eq!(config.max_iterations, 3);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("supervisor.toml");
        std::fs::write(&path, "not valid = [[[").unwrap();
        assert!(SupervisorConfig::load(&path).is_err());
    }
}
