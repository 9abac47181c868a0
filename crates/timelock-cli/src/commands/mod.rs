pub mod device;
pub mod session;
pub mod watch;

use anyhow::Result;
use serde::Serialize;
use timelock_api::{AppEntry, AppState};
use timelock_util::format_countdown;

/// Seconds from `900`, `15m`, `1h30m` and the like
pub fn parse_duration_secs(input: &str) -> Result<u64, String> {
    let input = input.trim();
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(input)
        .map(|d| d.as_secs())
        .map_err(|e| format!("invalid duration '{}': {}", input, e))
}

/// One human-readable line describing where an entry stands
pub fn describe(entry: &AppEntry) -> String {
    let detail = match entry.state {
        AppState::Active => format!("{} left", format_countdown(entry.remaining_seconds)),
        AppState::Locked => format!("locked for {}", format_countdown(entry.remaining_seconds)),
        AppState::Pending => "awaiting limits".to_string(),
        AppState::Unselected => "cycle finished".to_string(),
    };
    format!(
        "{:<32} {:<20} {:<10} {}",
        entry.package_id.as_str(),
        entry.display_name,
        entry.state.to_string(),
        detail
    )
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
