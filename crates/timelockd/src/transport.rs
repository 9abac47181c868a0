//! Sync transport that fans documents out to IPC subscribers

use async_trait::async_trait;
use std::sync::Arc;
use timelock_api::{Event, EventPayload, SyncPayload};
use timelock_core::{SyncError, SyncTransport};
use timelock_ipc::IpcServer;
use tracing::debug;

pub struct IpcBroadcastTransport {
    ipc: Arc<IpcServer>,
}

impl IpcBroadcastTransport {
    pub fn new(ipc: Arc<IpcServer>) -> Self {
        Self { ipc }
    }
}

#[async_trait]
impl SyncTransport for IpcBroadcastTransport {
    async fn publish(&self, payload: &SyncPayload) -> Result<(), SyncError> {
        debug!(revision = payload.revision, "Broadcasting document");
        self.ipc
            .broadcast_event(Event::new(EventPayload::DocumentPublished(payload.clone())));
        Ok(())
    }
}
