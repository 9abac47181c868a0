//! The foreground session engine and its connections

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use timelock_api::{Command, ContextRole, PermissionStatus, ResponsePayload};
use timelock_config::EngineConfig;
use timelock_core::{PermissionGate, SessionEngine, SyncHealth, SyncOutbox, SyncPublisher};
use timelock_ipc::request_blocking;
use timelock_monitor_api::PermissionProbe;
use timelock_store::{KvStore, SessionStore, SqliteStore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::IpcSyncTransport;

/// How long to wait at exit for the last publish
const PUBLISH_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on one permission query
const PERMISSION_TIMEOUT: Duration = Duration::from_secs(2);

/// Asks timelockd on every check; the user can revoke a permission at any time
pub struct DaemonPermissions {
    socket_path: PathBuf,
}

impl DaemonPermissions {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

impl PermissionProbe for DaemonPermissions {
    fn check_permissions(&self) -> PermissionStatus {
        match request_blocking(&self.socket_path, Command::CheckPermissions, PERMISSION_TIMEOUT) {
            Ok(ResponsePayload::Permissions(status)) => status,
            Ok(other) => {
                warn!(response = ?other, "Unexpected permission answer, treated as missing");
                PermissionStatus::default()
            }
            Err(e) => {
                warn!(error = %e, "timelockd not reachable, permissions treated as missing");
                PermissionStatus::default()
            }
        }
    }
}

pub struct ForegroundContext {
    engine: SessionEngine,
    sync_health: Arc<SyncHealth>,
    publisher: JoinHandle<()>,
    socket_path: PathBuf,
}

impl ForegroundContext {
    /// Open the shared store and recover
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let socket_path = config.service.socket_path.clone();
        let data_dir = &config.service.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = config.service.db_path();
        let kv: Arc<dyn KvStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        let (outbox, rx) = SyncOutbox::channel();
        let sync_health = outbox.health();
        let publisher = SyncPublisher::new(
            Arc::new(IpcSyncTransport::new(&socket_path)),
            config.retry,
            &outbox,
        );
        let publisher = tokio::spawn(publisher.run(rx));

        let mut engine = SessionEngine::new(
            config,
            ContextRole::Foreground,
            SessionStore::new(kv),
            PermissionGate::new(Arc::new(DaemonPermissions::new(&socket_path))),
            outbox,
        );
        engine.recover(timelock_util::now());

        Ok(Self {
            engine,
            sync_health,
            publisher,
            socket_path,
        })
    }

    pub fn engine(&mut self) -> &mut SessionEngine {
        &mut self.engine
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Make sure the last change was saved or delivered, then shut down.
    ///
    /// Fails only when neither happened, i.e. the change is lost.
    pub async fn finish(self) -> Result<()> {
        let ForegroundContext {
            mut engine,
            sync_health,
            publisher,
            ..
        } = self;

        let stored = engine.flush();
        // Dropping the engine closes the outbox so the publisher drains and exits
        drop(engine);

        match tokio::time::timeout(PUBLISH_GRACE, publisher).await {
            Ok(Ok(())) => debug!("Publisher drained"),
            Ok(Err(e)) => warn!(error = %e, "Publisher task failed"),
            Err(_) => {
                sync_health.mark_failed("publish still pending at exit");
            }
        }

        match (stored, sync_health.failure()) {
            (Err(store), Some(sync)) => {
                bail!("Change was neither saved nor delivered ({}; {})", store, sync)
            }
            (Err(store), None) => {
                warn!(error = %store, "Change reached timelockd but was not saved locally");
                Ok(())
            }
            (Ok(()), Some(sync)) => {
                warn!(error = %sync, "Change not delivered to timelockd, it will read it from the store");
                Ok(())
            }
            (Ok(()), None) => Ok(()),
        }
    }
}
