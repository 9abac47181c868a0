//! Permission gate

use std::sync::Arc;
use timelock_api::PermissionStatus;
use timelock_monitor_api::PermissionProbe;
use tracing::debug;

use crate::{EngineError, EngineResult};

/// Decides whether enforcement is possible. Asks the probe on every call.
#[derive(Clone)]
pub struct PermissionGate {
    probe: Arc<dyn PermissionProbe>,
}

impl PermissionGate {
    pub fn new(probe: Arc<dyn PermissionProbe>) -> Self {
        Self { probe }
    }

    pub fn status(&self) -> PermissionStatus {
        self.probe.check_permissions()
    }

    /// `PermissionDenied` naming every missing grant
    pub fn require_enforceable(&self) -> EngineResult<()> {
        let status = self.status();
        if status.is_enforceable() {
            return Ok(());
        }
        debug!(?status, "Permission gate closed");
        Err(EngineError::PermissionDenied {
            missing: status.missing(),
        })
    }
}

/// Fixed answer, for tests and tools that run without a device
pub struct StaticPermissions(pub PermissionStatus);

impl PermissionProbe for StaticPermissions {
    fn check_permissions(&self) -> PermissionStatus {
        self.0
    }
}
