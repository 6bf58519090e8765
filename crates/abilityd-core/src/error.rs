//! Lifecycle error types.

use thiserror::Error;

use crate::state::AbilityState;

/// Errors surfaced by the lifecycle engine.
///
/// Synchronous API misuse is rejected immediately through these variants;
/// asynchronous/remote failures are absorbed by the recovery paths and never
/// reach the original caller (which already received `Ok` once its request
/// was accepted).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The session descriptor is missing or carries no usable session token.
    #[error("session info is missing or has no session token")]
    InvalidSessionInfo,

    /// No tracked ability matches the given token.
    #[error("ability token {0} is not tracked")]
    TokenNotFound(u64),

    /// No tracked ability matches the given session id.
    #[error("no ability for session {0}")]
    SessionNotFound(i32),

    /// A remote party reported a transition the record is not in a position
    /// to take.
    #[error("invalid transition: expected {expected}, actual {actual}")]
    InvalidTransition {
        /// The state the record was required to be in.
        expected: AbilityState,
        /// The state the record is actually in.
        actual: AbilityState,
    },

    /// Terminate confirmation arrived for a record that is not terminating.
    ///
    /// Unlike [`LifecycleError::InvalidTransition`] this indicates the
    /// manager's own bookkeeping disagrees with the record, not merely an
    /// out-of-sync remote report.
    #[error("record is not terminating, actual state {actual}")]
    NotTerminating {
        /// The record's actual state.
        actual: AbilityState,
    },

    /// The root scene session has not been registered yet.
    #[error("root scene session is not set")]
    RootSessionUnavailable,

    /// Process-attachment bookkeeping refused the attach; the session is
    /// closed instead of proceeding.
    #[error("process attachment failed")]
    ProcessAttachmentFailed,

    /// Call resolution failed terminally.
    #[error("failed to resolve call binding")]
    ResolveCallFailed,

    /// No record/connection pair matched a call release.
    #[error("failed to release call binding")]
    ReleaseCallFailed,

    /// The caller is not the application owning the target ability.
    #[error("caller is not the target application")]
    NotSelfApplication,

    /// The record's process options do not permit the operation.
    #[error("process options check failed")]
    StartOptionsCheckFailed,

    /// The record's visibility state does not permit the operation.
    #[error("ability visibility state check failed")]
    VisibilityCheckFailed,

    /// Remote notification to the compositor failed.
    #[error("scene session call failed: {0}")]
    SceneSession(String),
}

impl From<crate::session::SceneSessionError> for LifecycleError {
    fn from(err: crate::session::SceneSessionError) -> Self {
        Self::SceneSession(err.0)
    }
}

/// Convenience alias used throughout the engine.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
