//! IPC layer for timelockd
//!
//! Provides:
//! - Unix domain socket server
//! - NDJSON (newline-delimited JSON) protocol
//! - Peer UID authentication
//! - Event fan-out to subscribed clients
//! - Blocking one-shot requests for synchronous callers

mod blocking;
mod client;
mod server;

pub use blocking::*;
pub use client::*;
pub use server::*;

use thiserror::Error;
use timelock_api::ErrorInfo;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Server error: {0}")]
    ServerError(String),

    /// The daemon answered with an error
    #[error("Request rejected: {0}")]
    Rejected(ErrorInfo),
}

pub type IpcResult<T> = Result<T, IpcError>;
