//! Config validation CLI tool
//!
//! Validates a timelock configuration file and reports any errors.

use timelock_util::{default_config_path, format_countdown};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a timelock configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match timelock_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", timelock_config::CURRENT_CONFIG_VERSION);
            println!("  Socket: {}", config.service.socket_path.display());
            println!("  Database: {}", config.service.db_path().display());
            println!(
                "  Max controlled apps: {}",
                config.session.max_controlled_apps
            );
            println!(
                "  Longest access budget: {}",
                format_countdown(config.session.max_access_seconds)
            );
            println!(
                "  Longest lock: {}",
                format_countdown(config.session.max_lock_seconds)
            );
            println!(
                "  Ticks: ui {:?}, enforcement {:?}",
                config.countdown.ui_tick, config.countdown.enforcement_tick
            );
            match config.countdown.republish_every_ticks {
                Some(n) => println!("  Republish: every {} enforcement ticks", n),
                None => println!("  Republish: disabled"),
            }
            println!(
                "  Retry: {} attempts, {:?}..{:?} backoff",
                config.retry.max_attempts, config.retry.initial_backoff, config.retry.max_backoff
            );

            if !config.monitor.exempt_packages.is_empty() {
                println!();
                println!("Exempt packages:");
                for package in &config.monitor.exempt_packages {
                    println!("  - {}", package);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                timelock_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                timelock_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                timelock_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                timelock_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        timelock_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
