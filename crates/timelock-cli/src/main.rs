//! timelockctl - foreground context of timelock
//!
//! Each invocation runs its own session engine against the shared store,
//! publishes the resulting document to timelockd, and exits. `watch` keeps
//! the engine alive and renders countdowns once per UI tick.

mod commands;
mod context;
mod transport;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use timelock_config::{load_config_or_default, EngineConfig};
use timelock_util::default_config_path;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "timelockctl", version, about = "Control app access windows and lock periods")]
struct Cli {
    /// Configuration file path (default: ~/.config/timelock/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set TIMELOCK_SOCKET env var)
    #[arg(short, long, env = "TIMELOCK_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set TIMELOCK_DATA_DIR env var)
    #[arg(short, long, env = "TIMELOCK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (logs go to stderr)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add an app to the controlled set
    Select {
        package_id: String,
        /// Display name (defaults to the installed app's name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    /// Remove an app that is not mid-cycle
    Deselect { package_id: String },
    /// Start the access window of a selected app
    Activate {
        package_id: String,
        /// Access budget, e.g. 900, 15m, 1h30m
        #[arg(long, value_parser = commands::parse_duration_secs)]
        access: u64,
        /// Lock duration after the budget is used up
        #[arg(long, value_parser = commands::parse_duration_secs)]
        lock: u64,
    },
    /// End an access window now and start the lock
    ForceEnd { package_id: String },
    /// Show every controlled app
    Status,
    /// Follow countdowns live
    Watch,
    /// List user apps reported by the device
    Apps,
    /// Show permission state, optionally opening a settings panel
    Permissions {
        #[arg(long, value_enum)]
        open: Option<commands::device::Panel>,
    },
    /// Show timelockd health
    Health,
}

fn settings(cli: &Cli) -> Result<EngineConfig> {
    let mut config = load_config_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    if let Some(socket) = &cli.socket {
        config.service.socket_path = socket.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.service.data_dir = data_dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = settings(&cli)?;
    let json = cli.json;

    match cli.command {
        Commands::Select {
            package_id,
            name,
            icon,
        } => commands::session::select(config, package_id, name, icon, json).await,
        Commands::Deselect { package_id } => {
            commands::session::deselect(config, package_id, json).await
        }
        Commands::Activate {
            package_id,
            access,
            lock,
        } => commands::session::activate(config, package_id, access, lock, json).await,
        Commands::ForceEnd { package_id } => {
            commands::session::force_end(config, package_id, json).await
        }
        Commands::Status => commands::session::status(config, json).await,
        Commands::Watch => commands::watch::run(config).await,
        Commands::Apps => commands::device::apps(config, json).await,
        Commands::Permissions { open } => commands::device::permissions(config, open, json).await,
        Commands::Health => commands::device::health(config, json).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_accepts_human_durations() {
        let cli = Cli::parse_from([
            "timelockctl",
            "activate",
            "com.x",
            "--access",
            "15m",
            "--lock",
            "1h",
        ]);
        match cli.command {
            Commands::Activate { access, lock, .. } => {
                assert_eq!(access, 900);
                assert_eq!(lock, 3600);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn overrides_apply_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "timelockctl",
            "--config",
            dir.path().join("missing.toml").to_str().unwrap(),
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--socket",
            "/tmp/x.sock",
            "status",
        ]);
        let config = settings(&cli).unwrap();
        assert_eq!(config.service.data_dir, dir.path());
        assert_eq!(config.service.socket_path, PathBuf::from("/tmp/x.sock"));
    }
}
