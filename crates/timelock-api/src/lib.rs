//! Data model and protocol types for timelock
//!
//! This crate defines the stable contract shared by both execution contexts:
//! - The session document (what is persisted and synced)
//! - Commands and responses exchanged with timelockd
//! - Events streamed from timelockd to subscribers
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
