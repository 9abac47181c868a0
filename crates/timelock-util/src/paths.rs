//! Default paths for timelock components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/timelock/timelockd.sock` or `/tmp/timelock-$USER/timelockd.sock`
//! - Data: `$XDG_DATA_HOME/timelock` or `~/.local/share/timelock`
//! - Config: `$XDG_CONFIG_HOME/timelock/config.toml` or `~/.config/timelock/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const TIMELOCK_SOCKET_ENV: &str = "TIMELOCK_SOCKET";

/// Environment variable for overriding the data directory
pub const TIMELOCK_DATA_DIR_ENV: &str = "TIMELOCK_DATA_DIR";

const SOCKET_FILENAME: &str = "timelockd.sock";
const DB_FILENAME: &str = "timelock.db";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "timelock";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$TIMELOCK_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/timelock/timelockd.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/timelock-$USER/timelockd.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(TIMELOCK_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking the TIMELOCK_SOCKET env var.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$TIMELOCK_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/timelock` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/timelock` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(TIMELOCK_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking the TIMELOCK_DATA_DIR env var.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share").join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Database file inside a data directory. Both contexts open the same file.
pub fn db_path_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(DB_FILENAME)
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_contains_app_dir() {
        let path = socket_path_without_env();
        assert!(path.to_string_lossy().contains("timelock"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn data_dir_contains_app_dir() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("timelock"));
    }

    #[test]
    fn db_path_is_inside_data_dir() {
        let dir = PathBuf::from("/var/lib/timelock");
        assert_eq!(db_path_in(&dir), dir.join("timelock.db"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }
}
