//! Shared utilities for timelock
//!
//! This crate provides:
//! - ID types (PackageId, ClientId, ListenerId)
//! - Wall-clock helpers (mock time, elapsed seconds, countdown formatting)
//! - Rate limiting helpers
//! - Bounded retry/backoff policy for store and sync operations
//! - Default paths for socket, data, and config

mod ids;
mod paths;
mod rate_limit;
mod retry;
mod time;

pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use retry::*;
pub use time::*;
