/// Collaboration settings: defaults, optional JSON file, environment overrides
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;
use versioning::VersionStoreConfig;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// Retention cap per branch
    pub max_versions: usize,

    /// Auto-save debounce window
    pub auto_save_interval_ms: u64,

    pub enable_branching: bool,

    /// Presence TTL; users silent for longer are dropped
    pub heartbeat_timeout_ms: u64,

    /// How often sessions sweep for expired users
    pub heartbeat_sweep_ms: u64,

    /// In-session event log ring size
    pub event_log_capacity: usize,

    /// Where session histories are persisted; in-memory only when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            max_versions: 50,
            auto_save_interval_ms: 2000,
            enable_branching: true,
            heartbeat_timeout_ms: 30_000,
            heartbeat_sweep_ms: 5000,
            event_log_capacity: 1000,
            data_dir: None,
        }
    }
}

impl CollabConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref()).await.map_err(|e| {
            crate::CollaborationError::InvalidOp(format!(
                "failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Apply `RESUME_COLLAB_*` overrides; unparsable values are ignored
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("RESUME_COLLAB_MAX_VERSIONS") {
            self.max_versions = v;
        }
        if let Some(v) = env_parse("RESUME_COLLAB_AUTOSAVE_MS") {
            self.auto_save_interval_ms = v;
        }
        if let Some(v) = env_flag("RESUME_COLLAB_ENABLE_BRANCHING") {
            self.enable_branching = v;
        }
        if let Some(v) = env_parse("RESUME_COLLAB_HEARTBEAT_MS") {
            self.heartbeat_timeout_ms = v;
        }
        self
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_millis(self.auto_save_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.heartbeat_timeout_ms as i64)
    }

    /// How often clients should ping; a third of the TTL
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis((self.heartbeat_timeout_ms / 3).max(1))
    }

    pub fn heartbeat_sweep(&self) -> Duration {
        Duration::from_millis(self.heartbeat_sweep_ms.max(1))
    }

    pub fn store_config(&self) -> VersionStoreConfig {
        VersionStoreConfig {
            max_versions: self.max_versions,
            enable_branching: self.enable_branching,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                warn!("Ignoring {}={:?}: expected a boolean", key, v);
                None
            }
        }
    })
}
