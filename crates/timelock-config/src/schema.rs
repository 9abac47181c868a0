//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub session: RawSessionConfig,

    #[serde(default)]
    pub countdown: RawCountdownConfig,

    #[serde(default)]
    pub retry: RawRetryConfig,

    #[serde(default)]
    pub monitor: RawMonitorConfig,
}

/// Paths shared by both contexts
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: `$XDG_RUNTIME_DIR/timelock/timelockd.sock`)
    pub socket_path: Option<PathBuf>,

    /// Data directory holding the SQLite store
    pub data_dir: Option<PathBuf>,
}

/// Session model limits
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSessionConfig {
    /// Maximum number of Pending + Active entries
    pub max_controlled_apps: Option<usize>,

    /// Upper bound accepted for an access budget
    pub max_access_seconds: Option<u64>,

    /// Upper bound accepted for a lock duration
    pub max_lock_seconds: Option<u64>,
}

/// Tick cadences
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCountdownConfig {
    /// Cadence for user-facing countdowns
    pub ui_tick_millis: Option<u64>,

    /// Cadence for background enforcement
    pub enforcement_tick_millis: Option<u64>,

    /// Republish the full document every N enforcement ticks (0 disables)
    pub republish_every_ticks: Option<u32>,
}

/// Store/sync retry policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRetryConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_millis: Option<u64>,
    pub max_backoff_millis: Option<u64>,
}

/// Enforcement settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawMonitorConfig {
    /// Packages whose launches are never blocked. Replaces the defaults when set.
    pub exempt_packages: Option<Vec<String>>,
}
