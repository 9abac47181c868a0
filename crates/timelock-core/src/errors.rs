//! Engine error taxonomy

use thiserror::Error;
use timelock_api::AppState;
use timelock_util::PackageId;

/// Errors returned by [`crate::SessionEngine`] commands.
///
/// The first four are caller errors: the document is left untouched and
/// nothing is published. The rest describe transient conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("At most {max} apps may be pending or active at once")]
    CapacityExceeded { max: usize },

    #[error("Cannot {action} '{package_id}' while it is {state}")]
    InvalidStateTransition {
        package_id: PackageId,
        state: AppState,
        action: &'static str,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing permissions: {}", .missing.join(", "))]
    PermissionDenied { missing: Vec<&'static str> },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Sync unavailable: {0}")]
    SyncUnavailable(String),

    /// The other context kept committing first; nothing was changed here
    #[error("Revision {revision} was committed concurrently by the other context")]
    ConcurrentUpdate { revision: u64 },
}

impl EngineError {
    /// Caller errors leave state unchanged and are not worth retrying
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::CapacityExceeded { .. }
                | EngineError::InvalidStateTransition { .. }
                | EngineError::InvalidArgument(_)
                | EngineError::PermissionDenied { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = EngineError::InvalidStateTransition {
            package_id: PackageId::new("com.x"),
            state: AppState::Locked,
            action: "deselect",
        };
        assert_eq!(err.to_string(), "Cannot deselect 'com.x' while it is locked");

        let err = EngineError::PermissionDenied {
            missing: vec!["accessibility", "overlay"],
        };
        assert_eq!(err.to_string(), "Missing permissions: accessibility, overlay");
        assert!(err.is_caller_error());
        assert!(!EngineError::StoreUnavailable("x".into()).is_caller_error());
        assert!(!EngineError::ConcurrentUpdate { revision: 3 }.is_caller_error());
    }
}
