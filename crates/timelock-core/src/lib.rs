//! Session and lock state engine for timelock
//!
//! This crate is the heart of timelock, containing:
//! - The per-app lifecycle (Unselected -> Pending -> Active -> Locked -> Unselected)
//! - Wall-clock countdown recomputation (`tick_to_now`)
//! - The session engine: validation, persistence, degraded mode
//! - Revisioned whole-document sync between execution contexts
//! - Event dispatch to registered listeners
//! - The permission gate and launch verdicts

mod countdown;
mod dispatcher;
mod enforcement;
mod engine;
mod errors;
mod events;
mod gate;
mod session;
mod sync;

pub use countdown::*;
pub use dispatcher::*;
pub use enforcement::*;
pub use engine::*;
pub use errors::*;
pub use events::*;
pub use gate::*;
pub use session::*;
pub use sync::*;
