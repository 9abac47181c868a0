//! Mock monitor for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use timelock_api::{AppMetadata, PermissionStatus};
use timelock_util::PackageId;
use tokio::sync::mpsc;

use crate::{MonitorAdapter, MonitorError, MonitorEvent, MonitorResult, PermissionProbe};

/// Mock monitor for unit/integration testing
pub struct MockMonitor {
    accessibility: AtomicBool,
    overlay: AtomicBool,
    monitoring: AtomicBool,
    settings_opened: AtomicU32,
    apps: Mutex<Vec<AppMetadata>>,
    event_tx: mpsc::UnboundedSender<MonitorEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<MonitorEvent>>>,
}

impl MockMonitor {
    /// Monitor with both grants given and no installed apps
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            accessibility: AtomicBool::new(true),
            overlay: AtomicBool::new(true),
            monitoring: AtomicBool::new(false),
            settings_opened: AtomicU32::new(0),
            apps: Mutex::new(Vec::new()),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn with_apps(self, apps: Vec<AppMetadata>) -> Self {
        *lock(&self.apps) = apps;
        self
    }

    pub fn set_permissions(&self, status: PermissionStatus) {
        self.accessibility
            .store(status.accessibility_granted, Ordering::SeqCst);
        self.overlay.store(status.overlay_granted, Ordering::SeqCst);
    }

    /// Number of settings panels opened so far
    pub fn settings_opened(&self) -> u32 {
        self.settings_opened.load(Ordering::SeqCst)
    }

    /// Simulate an app coming to the foreground
    pub fn simulate_launch(&self, package_id: impl Into<PackageId>) {
        let _ = self.event_tx.send(MonitorEvent::AppForeground {
            package_id: package_id.into(),
        });
    }
}

impl Default for MockMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PermissionProbe for MockMonitor {
    fn check_permissions(&self) -> PermissionStatus {
        PermissionStatus {
            accessibility_granted: self.accessibility.load(Ordering::SeqCst),
            overlay_granted: self.overlay.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl MonitorAdapter for MockMonitor {
    async fn get_installed_apps(&self) -> MonitorResult<Vec<AppMetadata>> {
        Ok(lock(&self.apps).clone())
    }

    async fn open_accessibility_settings(&self) -> MonitorResult<()> {
        self.settings_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_overlay_settings(&self) -> MonitorResult<()> {
        self.settings_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_monitoring(&self) -> MonitorResult<()> {
        let status = self.check_permissions();
        if !status.is_enforceable() {
            return Err(MonitorError::PermissionMissing(status.missing().join(", ")));
        }
        self.monitoring.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_monitoring(&self) -> MonitorResult<()> {
        self.monitoring.store(false, Ordering::SeqCst);
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_monitoring_lifecycle() {
        let monitor = MockMonitor::new();
        assert!(!monitor.is_monitoring());

        monitor.start_monitoring().await.unwrap();
        assert!(monitor.is_monitoring());

        monitor.stop_monitoring().await.unwrap();
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn start_refused_without_grants() {
        let monitor = MockMonitor::new();
        monitor.set_permissions(PermissionStatus {
            accessibility_granted: true,
            overlay_granted: false,
        });

        let result = monitor.start_monitoring().await;
        assert!(matches!(result, Err(MonitorError::PermissionMissing(m)) if m == "overlay"));
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn launches_arrive_on_subscription() {
        let monitor = MockMonitor::new();
        let mut rx = monitor.subscribe().unwrap();
        assert!(matches!(monitor.subscribe(), Err(MonitorError::AlreadySubscribed)));

        monitor.simulate_launch("com.x");
        assert_eq!(
            rx.recv().await,
            Some(MonitorEvent::AppForeground {
                package_id: PackageId::new("com.x")
            })
        );
    }

    #[test]
    fn permission_changes_are_not_cached() {
        let monitor = MockMonitor::new();
        assert!(monitor.check_permissions().is_enforceable());

        monitor.set_permissions(PermissionStatus::default());
        assert!(!monitor.check_permissions().is_enforceable());
    }
}
