use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trackmove::{Capability, MatchPolicy, MatchTolerance, RetryPolicy};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl AppConfig {
    pub fn backend(&self, label: &str) -> Option<&BackendEntry> {
        self.backends.iter().find(|entry| entry.label == label)
    }
}

/// A single configured backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendEntry {
    pub label: String,
    #[serde(flatten)]
    pub backend_type: BackendType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum BackendType {
    /// Local SQLite store.
    #[serde(rename = "store")]
    Store { path: Option<PathBuf> },

    /// Tracking service reached over HTTP.
    #[serde(rename = "remote")]
    Remote {
        url: String,
        username: Option<String>,
        /// Environment variable holding the password or API token.
        token_env: Option<String>,
        #[serde(default)]
        unsupported: Vec<Capability>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub time_tolerance_secs: i64,
    pub point_tolerance: usize,
    pub route_tolerance_m: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        let policy = MatchPolicy::default();
        Self {
            time_tolerance_secs: policy.tolerance.time.num_seconds(),
            point_tolerance: policy.tolerance.points,
            route_tolerance_m: policy.route_tolerance_m,
        }
    }
}

impl MatchingConfig {
    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            tolerance: MatchTolerance {
                time: chrono::Duration::seconds(self.time_tolerance_secs.max(0)),
                points: self.point_tolerance,
            },
            route_tolerance_m: self.route_tolerance_m,
            ..MatchPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: u64::try_from(policy.initial_backoff.as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..RetryPolicy::default()
        }
    }
}

/// Config file path: `~/.config/trackmove/backends.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("trackmove").join("backends.toml"))
}

/// Default database location for a store backend without an explicit path.
pub fn default_store_path(label: &str) -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("trackmove").join(format!("{label}.db")))
}

/// Load config from `path` (or the default location), falling back to
/// defaults if the file is missing or unreadable.
pub fn load_config(path: Option<&Path>) -> AppConfig {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_path) else {
        return AppConfig::default();
    };
    let Ok(contents) = std::fs::read_to_string(&path) else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return AppConfig::default();
    };

    match toml::from_str::<AppConfig>(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
            AppConfig::default()
        }
    }
}
