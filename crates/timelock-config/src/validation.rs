//! Configuration validation

use crate::schema::RawConfig;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[{section}] {key}: {message}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        message: String,
    },

    #[error("Duplicate exempt package: {0}")]
    DuplicateExemptPackage(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

impl ValidationError {
    fn invalid(section: &'static str, key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            section,
            key,
            message: message.into(),
        }
    }
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let session = &config.session;
    if session.max_controlled_apps == Some(0) {
        errors.push(ValidationError::invalid(
            "session",
            "max_controlled_apps",
            "must be at least 1",
        ));
    }
    if session.max_access_seconds == Some(0) {
        errors.push(ValidationError::invalid(
            "session",
            "max_access_seconds",
            "must be greater than zero",
        ));
    }
    if session.max_lock_seconds == Some(0) {
        errors.push(ValidationError::invalid(
            "session",
            "max_lock_seconds",
            "must be greater than zero",
        ));
    }

    let countdown = &config.countdown;
    if countdown.ui_tick_millis == Some(0) {
        errors.push(ValidationError::invalid(
            "countdown",
            "ui_tick_millis",
            "must be greater than zero",
        ));
    }
    if countdown.enforcement_tick_millis == Some(0) {
        errors.push(ValidationError::invalid(
            "countdown",
            "enforcement_tick_millis",
            "must be greater than zero",
        ));
    }
    if let (Some(ui), Some(enforcement)) =
        (countdown.ui_tick_millis, countdown.enforcement_tick_millis)
        && ui > enforcement
    {
        errors.push(ValidationError::GlobalError(format!(
            "ui_tick_millis ({}) must not exceed enforcement_tick_millis ({})",
            ui, enforcement
        )));
    }

    let retry = &config.retry;
    if retry.max_attempts == Some(0) {
        errors.push(ValidationError::invalid(
            "retry",
            "max_attempts",
            "must be at least 1",
        ));
    }
    if let (Some(initial), Some(max)) = (retry.initial_backoff_millis, retry.max_backoff_millis)
        && initial > max
    {
        errors.push(ValidationError::invalid(
            "retry",
            "initial_backoff_millis",
            format!("{}ms exceeds max_backoff_millis {}ms", initial, max),
        ));
    }

    if let Some(exempt) = &config.monitor.exempt_packages {
        let mut seen = HashSet::new();
        for package in exempt {
            if package.trim().is_empty() {
                errors.push(ValidationError::invalid(
                    "monitor",
                    "exempt_packages",
                    "package ids cannot be empty",
                ));
            } else if !seen.insert(package.as_str()) {
                errors.push(ValidationError::DuplicateExemptPackage(package.clone()));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::*;

    fn raw() -> RawConfig {
        RawConfig {
            config_version: 1,
            service: RawServiceConfig::default(),
            session: RawSessionConfig::default(),
            countdown: RawCountdownConfig::default(),
            retry: RawRetryConfig::default(),
            monitor: RawMonitorConfig::default(),
        }
    }

    #[test]
    fn empty_sections_are_valid() {
        assert!(validate_config(&raw()).is_empty());
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = raw();
        config.session.max_controlled_apps = Some(0);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("max_controlled_apps"));
    }

    #[test]
    fn ui_cadence_must_not_exceed_enforcement() {
        let mut config = raw();
        config.countdown.ui_tick_millis = Some(10_000);
        config.countdown.enforcement_tick_millis = Some(5_000);

        let errors = validate_config(&config);
        assert!(matches!(errors[0], ValidationError::GlobalError(_)));
    }

    #[test]
    fn backoff_bounds_checked() {
        let mut config = raw();
        config.retry.max_attempts = Some(0);
        config.retry.initial_backoff_millis = Some(500);
        config.retry.max_backoff_millis = Some(100);

        assert_eq!(validate_config(&config).len(), 2);
    }

    #[test]
    fn exempt_packages_checked() {
        let mut config = raw();
        config.monitor.exempt_packages = Some(vec![
            "com.android.settings".into(),
            " ".into(),
            "com.android.settings".into(),
        ]);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateExemptPackage(p) if p == "com.android.settings")));
    }
}
