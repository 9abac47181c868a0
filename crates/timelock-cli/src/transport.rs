//! Publishes documents to timelockd

use async_trait::async_trait;
use std::path::PathBuf;
use timelock_api::{Command, ResponsePayload, SyncPayload};
use timelock_core::{SyncError, SyncTransport};
use timelock_ipc::IpcClient;
use tracing::debug;

/// Opens a connection per publish; the CLI publishes a handful of times at most
pub struct IpcSyncTransport {
    socket_path: PathBuf,
}

impl IpcSyncTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

#[async_trait]
impl SyncTransport for IpcSyncTransport {
    async fn publish(&self, payload: &SyncPayload) -> Result<(), SyncError> {
        let mut client = IpcClient::connect(&self.socket_path)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let response = client
            .request(Command::PublishDocument {
                payload: payload.clone(),
            })
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        match response {
            ResponsePayload::Published { accepted: true, .. } => {
                debug!(revision = payload.revision, "Document published");
                Ok(())
            }
            // Already read from the shared store
            ResponsePayload::Published {
                accepted: false,
                revision,
            } if revision == payload.revision => {
                debug!(revision, "timelockd already had this revision");
                Ok(())
            }
            ResponsePayload::Published {
                accepted: false,
                revision,
            } => Err(SyncError::Superseded {
                offered: payload.revision,
                current: revision,
            }),
            other => Err(SyncError::Transport(format!(
                "unexpected response {:?}",
                other
            ))),
        }
    }
}
