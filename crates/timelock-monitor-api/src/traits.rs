//! Monitor adapter traits

use async_trait::async_trait;
use thiserror::Error;
use timelock_api::{AppMetadata, PermissionStatus};
use timelock_util::PackageId;
use tokio::sync::mpsc;

/// Errors from monitor operations
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Monitor unavailable: {0}")]
    Unavailable(String),

    #[error("Permission missing: {0}")]
    PermissionMissing(String),

    #[error("Event stream already taken")]
    AlreadySubscribed,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Events raised by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// An app window came to the foreground
    AppForeground { package_id: PackageId },

    /// The monitor blocked a launch and showed the overlay
    LaunchBlocked {
        package_id: PackageId,
        display_name: String,
    },
}

/// Current OS grants. Implementations must not cache: every call reflects
/// the collaborator's present state.
pub trait PermissionProbe: Send + Sync {
    fn check_permissions(&self) -> PermissionStatus;
}

/// Monitor adapter trait - implemented by the component that can see launches
#[async_trait]
pub trait MonitorAdapter: PermissionProbe {
    /// Launchable apps, unfiltered
    async fn get_installed_apps(&self) -> MonitorResult<Vec<AppMetadata>>;

    async fn open_accessibility_settings(&self) -> MonitorResult<()>;

    async fn open_overlay_settings(&self) -> MonitorResult<()>;

    /// Begin observing launches. Only called after a successful activation.
    async fn start_monitoring(&self) -> MonitorResult<()>;

    async fn stop_monitoring(&self) -> MonitorResult<()>;

    fn is_monitoring(&self) -> bool;

    /// Take the event stream. Can only be taken once.
    fn subscribe(&self) -> MonitorResult<mpsc::UnboundedReceiver<MonitorEvent>>;
}
