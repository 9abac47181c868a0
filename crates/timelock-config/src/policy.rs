//! Validated configuration ready for the engine

use crate::schema::{
    RawConfig, RawCountdownConfig, RawMonitorConfig, RawRetryConfig, RawServiceConfig,
    RawSessionConfig,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use timelock_util::{PackageId, RetryPolicy};

/// Launcher, system UI and settings packages that must stay reachable
pub const DEFAULT_EXEMPT_PACKAGES: &[&str] = &[
    "android",
    "com.android.launcher3",
    "com.android.settings",
    "com.android.systemui",
    "com.google.android.gms",
    "com.google.android.launcher",
    "com.mi.android.globallauncher",
    "com.miui.securitycenter",
];

/// Validated configuration shared by both execution contexts
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub service: ServiceConfig,
    pub session: SessionLimits,
    pub countdown: CountdownConfig,
    pub retry: RetryPolicy,
    pub monitor: MonitorConfig,
}

impl EngineConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            session: SessionLimits::from_raw(raw.session),
            countdown: CountdownConfig::from_raw(raw.countdown),
            retry: convert_retry(raw.retry),
            monitor: MonitorConfig::from_raw(raw.monitor),
        }
    }
}

/// Socket and data locations
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(timelock_util::default_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(timelock_util::default_data_dir),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        timelock_util::db_path_in(&self.data_dir)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Limits enforced at the session model boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Cap on Pending + Active entries
    pub max_controlled_apps: usize,
    pub max_access_seconds: u64,
    pub max_lock_seconds: u64,
}

impl SessionLimits {
    fn from_raw(raw: RawSessionConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_controlled_apps: raw
                .max_controlled_apps
                .unwrap_or(defaults.max_controlled_apps),
            max_access_seconds: raw.max_access_seconds.unwrap_or(defaults.max_access_seconds),
            max_lock_seconds: raw.max_lock_seconds.unwrap_or(defaults.max_lock_seconds),
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_controlled_apps: 5,
            max_access_seconds: 24 * 60 * 60,
            max_lock_seconds: 7 * 24 * 60 * 60,
        }
    }
}

/// Tick cadences for the two contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownConfig {
    pub ui_tick: Duration,
    pub enforcement_tick: Duration,
    /// Full-document republish interval in enforcement ticks. None disables it.
    pub republish_every_ticks: Option<u32>,
}

impl CountdownConfig {
    fn from_raw(raw: RawCountdownConfig) -> Self {
        let defaults = Self::default();
        Self {
            ui_tick: raw
                .ui_tick_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.ui_tick),
            enforcement_tick: raw
                .enforcement_tick_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.enforcement_tick),
            // 0 disables periodic republish
            republish_every_ticks: match raw.republish_every_ticks {
                Some(0) => None,
                Some(n) => Some(n),
                None => defaults.republish_every_ticks,
            },
        }
    }
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            ui_tick: Duration::from_secs(1),
            enforcement_tick: Duration::from_secs(5),
            republish_every_ticks: Some(12),
        }
    }
}

/// Enforcement settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub exempt_packages: BTreeSet<PackageId>,
}

impl MonitorConfig {
    fn from_raw(raw: RawMonitorConfig) -> Self {
        match raw.exempt_packages {
            Some(packages) => Self {
                exempt_packages: packages.into_iter().map(PackageId::from).collect(),
            },
            None => Self::default(),
        }
    }

    pub fn is_exempt(&self, package_id: &PackageId) -> bool {
        self.exempt_packages.contains(package_id)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            exempt_packages: DEFAULT_EXEMPT_PACKAGES
                .iter()
                .map(|p| PackageId::new(*p))
                .collect(),
        }
    }
}

fn convert_retry(raw: RawRetryConfig) -> RetryPolicy {
    let defaults = RetryPolicy::default();
    RetryPolicy::new(
        raw.max_attempts.unwrap_or(defaults.max_attempts),
        raw.initial_backoff_millis
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff),
        raw.max_backoff_millis
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff),
    )
}
