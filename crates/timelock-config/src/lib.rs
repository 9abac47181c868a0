//! Configuration parsing and validation for timelock
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Session capacity and duration limits
//! - Countdown cadences and store/sync retry policy
//! - Exempt packages for enforcement
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Like [`load_config`], but a missing file yields the defaults
pub fn load_config_or_default(path: impl AsRef<Path>) -> ConfigResult<EngineConfig> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No config file, using defaults");
            Ok(EngineConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<EngineConfig> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(EngineConfig::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let config = EngineConfig::default();
        let parsed = parse_config("config_version = 1").unwrap();

        assert_eq!(parsed.session, config.session);
        assert_eq!(parsed.countdown, config.countdown);
        assert_eq!(parsed.session.max_controlled_apps, 5);
    }

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1

            [service]
            socket_path = "/tmp/timelock-test/timelockd.sock"
            data_dir = "/tmp/timelock-test"

            [session]
            max_controlled_apps = 3
            max_access_seconds = 7200

            [countdown]
            ui_tick_millis = 500
            enforcement_tick_millis = 2000
            republish_every_ticks = 6

            [retry]
            max_attempts = 4
            initial_backoff_millis = 10
            max_backoff_millis = 80

            [monitor]
            exempt_packages = ["com.example.launcher"]
        "#;

        let parsed = parse_config(config).unwrap();
        assert_eq!(parsed.session.max_controlled_apps, 3);
        assert_eq!(parsed.session.max_access_seconds, 7200);
        assert_eq!(parsed.session.max_lock_seconds, 7 * 24 * 60 * 60);
        assert_eq!(parsed.countdown.ui_tick, Duration::from_millis(500));
        assert_eq!(parsed.countdown.republish_every_ticks, Some(6));
        assert_eq!(parsed.retry.max_attempts, 4);
        assert_eq!(parsed.retry.max_backoff, Duration::from_millis(80));
        assert_eq!(
            parsed.service.db_path(),
            std::path::PathBuf::from("/tmp/timelock-test/timelock.db")
        );
        assert_eq!(parsed.monitor.exempt_packages.len(), 1);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_values() {
        let config = r#"
            config_version = 1

            [session]
            max_controlled_apps = 0
        "#;

        match parse_config(config) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.session.max_controlled_apps, 5);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "config_version = 1\n[session]\nmax_controlled_apps = 2\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.session.max_controlled_apps, 2);
    }
}
