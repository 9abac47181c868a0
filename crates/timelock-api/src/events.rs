//! Event types for timelockd -> client streaming

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use timelock_util::PackageId;

use crate::{AppState, DegradedReason, SyncPayload, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: timelock_util::now(),
            payload,
        }
    }
}

/// Settings panels the monitor can be asked to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsPanel {
    Accessibility,
    Overlay,
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A newer document was accepted; subscribers should adopt it
    DocumentPublished(SyncPayload),

    /// An entry's timer ran out (Active -> Locked or Locked -> Unselected)
    TimeExpired {
        package_id: PackageId,
        from_state: AppState,
        to_state: AppState,
        /// When the timer reached zero, derived from the entry's timestamps
        at: DateTime<Local>,
    },

    /// A launch of a Locked app was observed and blocked
    AppLaunchBlocked {
        package_id: PackageId,
        display_name: String,
        remaining_seconds: u64,
    },

    /// Persistence or sync gave up; engine continues in memory
    Degraded { reason: DegradedReason },

    /// Persistence works again after a degraded period
    Recovered,

    /// Foreground monitoring should be started or stopped
    MonitoringRequested { enabled: bool },

    /// A client asked for a settings panel
    SettingsRequested { panel: SettingsPanel },

    /// Service is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::TimeExpired {
            package_id: PackageId::new("com.x"),
            from_state: AppState::Active,
            to_state: AppState::Locked,
            at: timelock_util::now(),
        });

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.api_version, API_VERSION);
        match parsed.payload {
            EventPayload::TimeExpired {
                from_state,
                to_state,
                ..
            } => {
                assert_eq!(from_state, AppState::Active);
                assert_eq!(to_state, AppState::Locked);
            }
            other => panic!("Expected TimeExpired, got {:?}", other),
        }
    }

    #[test]
    fn degraded_event_serialization() {
        let event = Event::new(EventPayload::Degraded {
            reason: DegradedReason::StoreUnavailable {
                detail: "disk full".into(),
            },
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "degraded");
        assert_eq!(json["payload"]["reason"]["kind"], "store_unavailable");
    }
}
