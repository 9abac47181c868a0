//! Shared types for the timelock API

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use timelock_util::PackageId;

/// Lifecycle state of a controlled app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// Known to the document but not part of a cycle
    Unselected,
    /// Selected, limits not yet confirmed
    Pending,
    /// Access window counting down
    Active,
    /// Lock window counting down
    Locked,
}

impl AppState {
    /// Active and Locked entries are mid-cycle and cannot be removed
    pub fn is_running(self) -> bool {
        matches!(self, AppState::Active | AppState::Locked)
    }

    /// States that occupy one of the limited selection slots
    pub fn counts_toward_capacity(self) -> bool {
        matches!(self, AppState::Pending | AppState::Active)
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppState::Unselected => "unselected",
            AppState::Pending => "pending",
            AppState::Active => "active",
            AppState::Locked => "locked",
        };
        f.write_str(s)
    }
}

/// Presentation metadata for an app. Opaque to the engine apart from the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub package_id: PackageId,
    pub display_name: String,
    /// Icon reference or encoded image, interpreted by the UI only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl AppMetadata {
    pub fn new(package_id: impl Into<PackageId>, display_name: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            display_name: display_name.into(),
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

/// One monitored application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub package_id: PackageId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Allowed usage per cycle
    pub access_budget_seconds: u64,
    /// Mandatory block after the access budget is exhausted
    pub lock_duration_seconds: u64,

    pub state: AppState,
    /// Time left in the current state
    pub remaining_seconds: u64,

    /// When the current access window started (Active and Locked)
    pub cycle_started_at: Option<DateTime<Local>>,
    /// When the lock window started (Locked only)
    pub locked_at: Option<DateTime<Local>>,
}

impl AppEntry {
    /// New entry in the Pending state, limits not yet set
    pub fn pending(metadata: AppMetadata) -> Self {
        Self {
            package_id: metadata.package_id,
            display_name: metadata.display_name,
            icon: metadata.icon,
            access_budget_seconds: 0,
            lock_duration_seconds: 0,
            state: AppState::Pending,
            remaining_seconds: 0,
            cycle_started_at: None,
            locked_at: None,
        }
    }

    pub fn metadata(&self) -> AppMetadata {
        AppMetadata {
            package_id: self.package_id.clone(),
            display_name: self.display_name.clone(),
            icon: self.icon.clone(),
        }
    }

    /// Budget of the state the entry is currently in
    pub fn state_budget(&self) -> u64 {
        match self.state {
            AppState::Active => self.access_budget_seconds,
            AppState::Locked => self.lock_duration_seconds,
            AppState::Unselected | AppState::Pending => 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

/// The full controlled set: the single unit that is persisted and synced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDocument {
    /// Monotonically increasing; bumped on every published mutation
    pub revision: u64,
    #[serde(default)]
    pub entries: BTreeMap<PackageId, AppEntry>,
}

impl SessionDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, package_id: &PackageId) -> Option<&AppEntry> {
        self.entries.get(package_id)
    }

    pub fn contains(&self, package_id: &PackageId) -> bool {
        self.entries.contains_key(package_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppEntry> {
        self.entries.values()
    }

    /// Entries occupying a selection slot (Pending or Active)
    pub fn capacity_used(&self) -> usize {
        self.iter()
            .filter(|e| e.state.counts_toward_capacity())
            .count()
    }

    /// True if any entry is mid-cycle
    pub fn has_running(&self) -> bool {
        self.iter().any(AppEntry::is_running)
    }

    pub fn count_in(&self, state: AppState) -> usize {
        self.iter().filter(|e| e.state == state).count()
    }
}

/// Which execution context produced a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRole {
    /// User-facing context: selection, activation, early termination
    Foreground,
    /// Enforcement context: expiry transitions and launch verdicts
    Background,
}

impl std::fmt::Display for ContextRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextRole::Foreground => f.write_str("foreground"),
            ContextRole::Background => f.write_str("background"),
        }
    }
}

/// Whole-document update carried over the sync channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Copy of `document.revision`, readable without walking the document
    pub revision: u64,
    pub origin: ContextRole,
    pub published_at: DateTime<Local>,
    pub document: SessionDocument,
}

impl SyncPayload {
    pub fn new(document: SessionDocument, origin: ContextRole, published_at: DateTime<Local>) -> Self {
        Self {
            revision: document.revision,
            origin,
            published_at,
            document,
        }
    }
}

/// The two OS-level grants enforcement depends on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatus {
    pub accessibility_granted: bool,
    pub overlay_granted: bool,
}

impl PermissionStatus {
    pub fn granted() -> Self {
        Self {
            accessibility_granted: true,
            overlay_granted: true,
        }
    }

    pub fn is_enforceable(&self) -> bool {
        self.accessibility_granted && self.overlay_granted
    }

    /// Names of the missing grants, for error messages
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.accessibility_granted {
            missing.push("accessibility");
        }
        if !self.overlay_granted {
            missing.push("overlay");
        }
        missing
    }
}

/// Decision for an observed app launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum LaunchVerdict {
    Allow,
    Block {
        package_id: PackageId,
        display_name: String,
        remaining_seconds: u64,
    },
}

impl LaunchVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, LaunchVerdict::Block { .. })
    }
}

/// Why the engine is running on its in-memory copy only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradedReason {
    StoreUnavailable { detail: String },
    SyncUnavailable { detail: String },
}

/// Read-only view handed across the presentation boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub api_version: u32,
    pub taken_at: DateTime<Local>,
    pub document: SessionDocument,
    #[serde(default)]
    pub degraded: Vec<DegradedReason>,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// UI running as another user - can view state and subscribe
    Shell,
    /// Same user or root - can publish documents and report observations
    Admin,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_publish(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }

    pub fn can_report_observations(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }

    pub fn can_request_settings(&self) -> bool {
        matches!(self, ClientRole::Shell | ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub store_ok: bool,
    pub monitoring_active: bool,
    pub revision: u64,
    #[serde(default)]
    pub degraded: Vec<DegradedReason>,
}
