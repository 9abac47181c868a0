//! Launch verdicts

use timelock_api::{AppState, LaunchVerdict, SessionDocument};
use timelock_config::MonitorConfig;
use timelock_util::PackageId;

/// Decide whether a launch of `package_id` may proceed.
///
/// `document` must already be ticked to the current time. Only Locked
/// entries block; exempt packages are never blocked.
pub fn launch_verdict(
    document: &SessionDocument,
    package_id: &PackageId,
    monitor: &MonitorConfig,
) -> LaunchVerdict {
    if monitor.is_exempt(package_id) {
        return LaunchVerdict::Allow;
    }

    match document.get(package_id) {
        Some(entry) if entry.state == AppState::Locked => LaunchVerdict::Block {
            package_id: entry.package_id.clone(),
            display_name: entry.display_name.clone(),
            remaining_seconds: entry.remaining_seconds,
        },
        _ => LaunchVerdict::Allow,
    }
}

/// Verdict while the lock state is unknown (no document could be read yet).
/// Every non-exempt launch is blocked.
pub fn unverified_launch_verdict(package_id: &PackageId, monitor: &MonitorConfig) -> LaunchVerdict {
    if monitor.is_exempt(package_id) {
        return LaunchVerdict::Allow;
    }
    LaunchVerdict::Block {
        package_id: package_id.clone(),
        display_name: package_id.to_string(),
        remaining_seconds: 0,
    }
}
