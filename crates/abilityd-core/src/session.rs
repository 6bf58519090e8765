//! Window-session descriptors and the compositor capability seam.
//!
//! A [`SessionInfo`] is exchanged with the remote scene/session compositor
//! for every activation. Its [`SessionToken`] wraps the compositor-side
//! session as a typed capability: validity is established once when the
//! token is constructed, replacing per-call descriptor-string checks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Token;
use crate::request::{ProcessOptions, StartSetting};
use crate::want::Want;

/// Stable integer key identifying a session/ability pairing.
pub type PersistentId = i32;

/// Error raised by a compositor-side session call.
///
/// These calls are fire-and-forget from the state machine's perspective;
/// failures are logged, never retried.
#[derive(Debug, Clone, Error)]
#[error("scene session error: {0}")]
pub struct SceneSessionError(pub String);

/// Capability interface of one compositor-side scene session.
///
/// Implemented by whatever IPC proxy the host platform provides; the
/// engine only ever talks to sessions through this trait.
pub trait SceneSession: Send + Sync {
    /// Asks the compositor to activate (or create) the session described
    /// by `info`.
    fn pending_activation(&self, info: &SessionInfo) -> Result<(), SceneSessionError>;

    /// Reports an abnormal lifecycle outcome for the session.
    ///
    /// `info.error_code` and `info.error_reason` carry the detail.
    fn notify_exception(&self, info: &SessionInfo) -> Result<(), SceneSessionError>;

    /// Asks the compositor to tear the session down.
    fn terminate_session(&self, info: &SessionInfo) -> Result<(), SceneSessionError>;

    /// Shows or hides the session together with its status-bar item.
    fn change_visibility_with_status_bar(
        &self,
        info: &SessionInfo,
        is_show: bool,
    ) -> Result<(), SceneSessionError>;
}

/// A validated handle to a compositor session.
///
/// Equality is identity: two tokens are equal when they wrap the same
/// session object.
#[derive(Clone)]
pub struct SessionToken(Arc<dyn SceneSession>);

impl SessionToken {
    /// Wraps a compositor session.
    #[must_use]
    pub fn new(session: Arc<dyn SceneSession>) -> Self {
        Self(session)
    }

    /// Returns the wrapped session.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn SceneSession> {
        &self.0
    }

    /// Identity comparison with another token.
    #[must_use]
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({:p})", Arc::as_ptr(&self.0))
    }
}

/// Foreground/background hint attached to a call-driven activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallToState {
    /// Not a call-driven activation.
    #[default]
    Unspecified,
    /// The callee should be brought to foreground.
    Foreground,
    /// The callee should stay in background.
    Background,
}

/// Window-session descriptor exchanged with the compositor.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Key into the authoritative map; `0` means not yet assigned.
    pub persistent_id: PersistentId,
    /// Handle to the compositor session, when one exists.
    pub session_token: Option<SessionToken>,
    /// The intent this session was activated with.
    pub want: Want,
    /// Token of the ability that requested the activation.
    pub caller_token: Option<Token>,
    /// Access token of the calling identity.
    pub calling_token_id: u32,
    /// Request code for result delivery back to the caller.
    pub request_code: i32,
    /// Process options forwarded from the start request.
    pub process_options: Option<ProcessOptions>,
    /// Start settings forwarded from the start request.
    pub start_setting: Option<StartSetting>,
    /// Whether a warm reuse should replace the record's want.
    pub is_new_want: bool,
    /// Whether reuse resolution matched an existing record.
    pub reuse: bool,
    /// Record id for call-created abilities parked before session binding.
    pub ui_ability_id: i64,
    /// Whether the target bundle is an atomic service.
    pub is_atomic_service: bool,
    /// Whether the activation may proceed from a backgrounded caller.
    pub can_start_ability_from_background: bool,
    /// Call-driven foreground/background hint.
    pub state: CallToState,
    /// User the session belongs to.
    pub user_id: i32,
    /// Error code carried by an exception notification.
    pub error_code: i32,
    /// Error reason carried by an exception notification.
    pub error_reason: String,
    /// Marks a return-to-caller activation; only ever set on the clone
    /// passed to a single `pending_activation` call.
    pub is_back_transition: bool,
    /// Compositor-side display name of the session.
    pub session_name: String,
}

impl SessionInfo {
    /// Returns whether the descriptor carries a usable session token.
    #[must_use]
    pub const fn has_session_token(&self) -> bool {
        self.session_token.is_some()
    }

    /// Returns a clone prepared as an exception notification.
    #[must_use]
    pub fn with_exception(&self, error_code: i32, error_reason: &str) -> Self {
        let mut info = self.clone();
        info.error_code = error_code;
        info.error_reason = error_reason.to_string();
        info
    }
}
