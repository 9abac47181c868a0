//! Command types for the timelockd protocol

use serde::{Deserialize, Serialize};
use timelock_util::{ClientId, PackageId};

use crate::{
    AppMetadata, ClientRole, HealthStatus, LaunchVerdict, PermissionStatus, SessionSnapshot,
    SyncPayload, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    PermissionDenied,
    RateLimited,
    StoreUnavailable,
    SyncUnavailable,
    MonitorError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Current session document as seen by the background context
    GetSnapshot,

    /// Offer a whole-document update (foreground publisher)
    PublishDocument { payload: SyncPayload },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    UnsubscribeEvents,

    /// Last permission state reported by the monitor
    CheckPermissions,

    /// User-launchable apps reported by the monitor, filtered and sorted
    ListInstalledApps,

    /// Ask the monitor to bring up the accessibility settings panel
    OpenAccessibilitySettings,

    /// Ask the monitor to bring up the overlay settings panel
    OpenOverlaySettings,

    // Monitor commands

    /// An app was brought to the foreground
    ReportAppLaunch { package_id: PackageId },

    ReportPermissions { status: PermissionStatus },

    ReportInstalledApps { apps: Vec<AppMetadata> },

    GetHealth,

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Commands only the monitor (same-user peer) may send
    pub fn requires_observation_rights(&self) -> bool {
        matches!(
            self,
            Command::ReportAppLaunch { .. }
                | Command::ReportPermissions { .. }
                | Command::ReportInstalledApps { .. }
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Snapshot(SessionSnapshot),
    /// `accepted` is false when the offered revision was not newer
    Published {
        accepted: bool,
        revision: u64,
    },
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Permissions(PermissionStatus),
    InstalledApps {
        apps: Vec<AppMetadata>,
    },
    SettingsRequested,
    LaunchVerdict {
        verdict: LaunchVerdict,
    },
    Reported,
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextRole, SessionDocument};

    #[test]
    fn request_serialization() {
        let req = Request::new(1, Command::GetSnapshot);
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        assert!(matches!(parsed.command, Command::GetSnapshot));
    }

    #[test]
    fn command_wire_tag_is_snake_case() {
        let cmd = Command::ReportAppLaunch {
            package_id: PackageId::new("com.x"),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "report_app_launch");
        assert_eq!(json["package_id"], "com.x");
    }

    #[test]
    fn publish_request_carries_document() {
        let mut doc = SessionDocument::new();
        doc.revision = 4;
        let payload = SyncPayload::new(doc, ContextRole::Foreground, timelock_util::now());

        let req = Request::new(9, Command::PublishDocument { payload });
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        match parsed.command {
            Command::PublishDocument { payload } => assert_eq!(payload.revision, 4),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn observation_commands_need_rights() {
        assert!(Command::ReportPermissions {
            status: PermissionStatus::granted()
        }
        .requires_observation_rights());
        assert!(!Command::GetSnapshot.requires_observation_rights());
        assert!(!Command::OpenOverlaySettings.requires_observation_rights());
    }

    #[test]
    fn error_response_serialization() {
        let resp = Response::error(3, ErrorInfo::new(ErrorCode::RateLimited, "slow down"));
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();

        match parsed.result {
            ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::RateLimited),
            ResponseResult::Ok(_) => panic!("expected error"),
        }
    }
}
