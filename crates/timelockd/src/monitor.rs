//! Monitor adapter fed by the device-side shim
//!
//! The shim is the process that can actually see launches and draw the
//! overlay. It connects over IPC, reports what it observes, and subscribes
//! to events to learn when it should start watching or open a settings
//! panel. This adapter holds the last reported state and turns adapter
//! calls into events for the shim.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use timelock_api::{AppMetadata, EventPayload, PermissionStatus, SettingsPanel};
use timelock_monitor_api::{
    MonitorAdapter, MonitorError, MonitorEvent, MonitorResult, PermissionProbe,
};
use timelock_util::PackageId;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct RemoteMonitor {
    permissions: Mutex<PermissionStatus>,
    installed: Mutex<Vec<AppMetadata>>,
    monitoring: AtomicBool,
    requests: mpsc::UnboundedSender<EventPayload>,
    event_tx: mpsc::UnboundedSender<MonitorEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<MonitorEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RemoteMonitor {
    /// `requests` carries events meant for the shim. Until the shim reports
    /// otherwise, no permission is assumed granted.
    pub fn new(requests: mpsc::UnboundedSender<EventPayload>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            permissions: Mutex::new(PermissionStatus::default()),
            installed: Mutex::new(Vec::new()),
            monitoring: AtomicBool::new(false),
            requests,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    pub fn record_permissions(&self, status: PermissionStatus) {
        let previous = std::mem::replace(&mut *lock(&self.permissions), status);
        if previous != status {
            info!(?status, "Permission state reported");
        }
    }

    pub fn record_installed_apps(&self, apps: Vec<AppMetadata>) {
        debug!(count = apps.len(), "Installed apps reported");
        *lock(&self.installed) = apps;
    }

    pub fn record_foreground(&self, package_id: PackageId) {
        let _ = self.event_tx.send(MonitorEvent::AppForeground { package_id });
    }

    pub fn record_blocked(&self, package_id: PackageId, display_name: String) {
        let _ = self.event_tx.send(MonitorEvent::LaunchBlocked {
            package_id,
            display_name,
        });
    }

    fn request(&self, payload: EventPayload) -> MonitorResult<()> {
        self.requests
            .send(payload)
            .map_err(|_| MonitorError::Unavailable("service loop stopped".into()))
    }
}

impl PermissionProbe for RemoteMonitor {
    fn check_permissions(&self) -> PermissionStatus {
        *lock(&self.permissions)
    }
}

#[async_trait]
impl MonitorAdapter for RemoteMonitor {
    async fn get_installed_apps(&self) -> MonitorResult<Vec<AppMetadata>> {
        Ok(lock(&self.installed).clone())
    }

    async fn open_accessibility_settings(&self) -> MonitorResult<()> {
        self.request(EventPayload::SettingsRequested {
            panel: SettingsPanel::Accessibility,
        })
    }

    async fn open_overlay_settings(&self) -> MonitorResult<()> {
        self.request(EventPayload::SettingsRequested {
            panel: SettingsPanel::Overlay,
        })
    }

    async fn start_monitoring(&self) -> MonitorResult<()> {
        let status = self.check_permissions();
        if !status.is_enforceable() {
            return Err(MonitorError::PermissionMissing(status.missing().join(", ")));
        }
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Asking shim to start monitoring");
        self.request(EventPayload::MonitoringRequested { enabled: true })
    }

    async fn stop_monitoring(&self) -> MonitorResult<()> {
        if !self.monitoring.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Asking shim to stop monitoring");
        self.request(EventPayload::MonitoringRequested { enabled: false })
    }

    fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> MonitorResult<mpsc::UnboundedReceiver<MonitorEvent>> {
        lock(&self.event_rx)
            .take()
            .ok_or(MonitorError::AlreadySubscribed)
    }
}
