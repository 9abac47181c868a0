//! Monitoring collaborator interfaces for timelock
//!
//! This crate defines the boundary between the session engine and whatever
//! observes app launches and draws the block overlay on the device. It
//! contains no platform code itself.

mod filter;
mod mock;
mod traits;

pub use filter::*;
pub use mock::*;
pub use traits::*;
