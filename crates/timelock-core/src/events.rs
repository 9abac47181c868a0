//! Core events emitted by the engine

use chrono::{DateTime, Local};
use timelock_api::{AppState, DegradedReason, EventPayload};
use timelock_util::PackageId;

/// Events emitted by the session engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A timer reached zero and the entry moved on
    TimeExpired {
        package_id: PackageId,
        from_state: AppState,
        to_state: AppState,
        at: DateTime<Local>,
    },

    /// A launch of a Locked app was refused
    AppLaunchBlocked {
        package_id: PackageId,
        display_name: String,
        remaining_seconds: u64,
    },

    /// A user command changed an entry (select, deselect, activate, force end)
    StateChanged {
        package_id: PackageId,
        from_state: Option<AppState>,
        to_state: Option<AppState>,
    },

    /// A new revision became the local document
    DocumentChanged { revision: u64 },

    /// Store or sync retries exhausted
    Degraded(DegradedReason),

    /// Store or sync works again after a degraded period
    Recovered,

    /// First entry went Active: launches must be observed
    MonitoringRequired,

    /// Nothing is Active or Locked any more
    MonitoringIdle,
}

impl CoreEvent {
    /// Wire form for IPC subscribers. Document changes travel as sync
    /// payloads instead.
    pub fn to_payload(&self) -> Option<EventPayload> {
        match self {
            CoreEvent::TimeExpired {
                package_id,
                from_state,
                to_state,
                at,
            } => Some(EventPayload::TimeExpired {
                package_id: package_id.clone(),
                from_state: *from_state,
                to_state: *to_state,
                at: *at,
            }),
            CoreEvent::AppLaunchBlocked {
                package_id,
                display_name,
                remaining_seconds,
            } => Some(EventPayload::AppLaunchBlocked {
                package_id: package_id.clone(),
                display_name: display_name.clone(),
                remaining_seconds: *remaining_seconds,
            }),
            CoreEvent::Degraded(reason) => Some(EventPayload::Degraded {
                reason: reason.clone(),
            }),
            CoreEvent::Recovered => Some(EventPayload::Recovered),
            CoreEvent::MonitoringRequired => {
                Some(EventPayload::MonitoringRequested { enabled: true })
            }
            CoreEvent::MonitoringIdle => Some(EventPayload::MonitoringRequested { enabled: false }),
            CoreEvent::StateChanged { .. } | CoreEvent::DocumentChanged { .. } => None,
        }
    }

    /// Stable identity of the underlying occurrence, if it has one.
    ///
    /// Both contexts derive expiry instants from the same timestamps, so the
    /// same expiry observed twice yields the same key.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            CoreEvent::TimeExpired {
                package_id,
                from_state,
                at,
                ..
            } => Some(format!("expired:{}:{}:{}", package_id, from_state, at.timestamp())),
            CoreEvent::DocumentChanged { revision } => Some(format!("revision:{}", revision)),
            _ => None,
        }
    }
}
