//! Trait seams toward the process manager and the host framework.
//!
//! All of these are one-way from the manager's perspective: an
//! implementation must not call back into the manager synchronously from
//! inside one of these methods, since the manager may be holding its state
//! lock across the call. Real transports are asynchronous IPC proxies;
//! test doubles should record the invocation and let the test drive the
//! corresponding completion entry point.

use std::collections::HashMap;
use std::sync::Mutex;

use abilityd_core::record::Token;
use abilityd_core::request::{AbilityInfo, AbilityRequest};
use abilityd_core::session::PersistentId;
use abilityd_core::state::{AppState, ExitReason};
use abilityd_core::want::{ElementName, Want};
use thiserror::Error;

/// Error raised by a process-manager call.
#[derive(Debug, Clone, Error)]
#[error("app service error: {0}")]
pub struct AppServiceError(pub String);

/// Proxy to the application process manager.
pub trait AppService: Send + Sync {
    /// Asks the process manager to load the ability's hosting process; the
    /// process later attaches through the manager's attach entry point.
    fn load_ability(&self, token: Token, info: &AbilityInfo, want: &Want, process_name: &str);

    /// Moves the ability's process toward foreground priority.
    fn move_to_foreground(&self, token: Token);

    /// Moves the ability's process toward background priority.
    fn move_to_background(&self, token: Token);

    /// Reports that an attach attempt timed out, unblocking any waiter.
    fn attach_timeout(&self, token: Token);

    /// Warns the process that termination of the ability is imminent.
    fn prepare_terminate(&self, token: Token, clear_session: bool);

    /// Tells the process manager the ability is terminated.
    ///
    /// # Errors
    ///
    /// Returns an error when the process-manager side rejects the
    /// termination; local cleanup proceeds regardless.
    fn terminate_ability(&self, token: Token) -> Result<(), AppServiceError>;

    /// Starts the specified-ability flag resolution protocol.
    fn start_specified_ability(&self, want: &Want, info: &AbilityInfo, request_id: i32);

    /// Starts the specified-process flag resolution protocol.
    fn start_specified_process(&self, want: &Want, info: &AbilityInfo, request_id: i32);

    /// Asks the process manager to clean the ability on user request;
    /// returns whether it could.
    fn clean_ability_by_user_request(&self, token: Token) -> bool;

    /// Blocks process caching for the given pids ahead of a kill sweep.
    fn block_process_cache_by_pids(&self, pids: &[i32]);

    /// Tokens of the abilities hosted by `pid`.
    fn ability_tokens_of_pid(&self, pid: i32) -> Vec<Token>;

    /// Kills the given processes.
    fn kill_processes_by_pids(&self, pids: &[i32]);
}

/// Process-level report delivered by the process manager.
#[derive(Debug, Clone)]
pub struct AppInfo {
    /// New process state.
    pub state: AppState,
    /// Name of the process the report is about.
    pub process_name: String,
}

/// Compositor-side handler observing session ordering.
pub trait SessionEventHandler: Send + Sync {
    /// A session completed its move to front.
    fn on_session_moved_to_front(&self, persistent_id: PersistentId);
}

/// Delegate notified when a process attaches for a status-bar ability.
pub trait StatusBarDelegate: Send + Sync {
    /// Returns whether the attachment was accepted; a refusal terminates
    /// the session instead of proceeding.
    fn on_process_attached(&self, token: Token) -> bool;
}

/// Persisted last-exit and recovery bookkeeping, consulted but not owned.
///
/// Entries are keyed by `(access_token_id, module_name, ability_key)`
/// where the ability key carries the persistent id suffix for
/// STANDARD-mode instances.
pub trait ExitReasonStore: Send + Sync {
    /// Session id recorded at the application's previous exit.
    fn session_id(&self, access_token_id: u32, module_name: &str, ability_name: &str)
    -> Option<PersistentId>;

    /// Whether recovery info exists for the ability.
    fn recover_info(&self, access_token_id: u32, module_name: &str, ability_key: &str) -> bool;

    /// Deletes recovery info once consumed (or on uninstall).
    fn delete_recover_info(&self, access_token_id: u32, module_name: &str, ability_key: &str);

    /// The recorded exit reason, if one was set.
    fn exit_reason(
        &self,
        bundle_name: &str,
        access_token_id: u32,
        ability_key: &str,
    ) -> Option<ExitReason>;
}

/// Permission queries routed to the host's verifier.
pub trait PermissionChecker: Send + Sync {
    /// Whether `uid` may drive activations while backgrounded.
    fn allow_start_from_background(&self, uid: i32) -> bool;

    /// Whether the application may intercept termination.
    fn verify_prepare_terminate(&self, access_token_id: u32) -> bool;

    /// Whether the caller may start with an explicit distributed
    /// persistent id.
    fn allow_distributed_persistent_id(&self) -> bool;
}

/// Behavioural telemetry emitted by the manager.
pub trait EventReporter: Send + Sync {
    /// More than one live instance exists for the element.
    fn on_multi_instance_started(&self, user_id: i32, element: &ElementName, count: usize);

    /// A non-exported ability was started.
    fn on_invisible_ability_started(&self, element: &ElementName);
}

/// Resolves a bare want into a full start request.
///
/// Needed for compositor-driven specified starts, where only the want
/// crosses the boundary.
pub trait RequestResolver: Send + Sync {
    /// Builds the request, or `None` when the target cannot be resolved.
    fn generate_ability_request(&self, want: &Want, user_id: i32) -> Option<AbilityRequest>;
}

/// Reporter that drops all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl EventReporter for NoopReporter {
    fn on_multi_instance_started(&self, _user_id: i32, _element: &ElementName, _count: usize) {}
    fn on_invisible_ability_started(&self, _element: &ElementName) {}
}

/// Fixed-answer permission checker.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticPermissions {
    /// Answer for background-start queries.
    pub start_from_background: bool,
    /// Answer for prepare-terminate queries.
    pub prepare_terminate: bool,
    /// Answer for distributed persistent-id starts.
    pub distributed_persistent_id: bool,
}

impl PermissionChecker for StaticPermissions {
    fn allow_start_from_background(&self, _uid: i32) -> bool {
        self.start_from_background
    }

    fn verify_prepare_terminate(&self, _access_token_id: u32) -> bool {
        self.prepare_terminate
    }

    fn allow_distributed_persistent_id(&self) -> bool {
        self.distributed_persistent_id
    }
}

type ExitKey = (u32, String, String);

/// In-memory [`ExitReasonStore`].
#[derive(Debug, Default)]
pub struct MemoryExitReasonStore {
    session_ids: Mutex<HashMap<ExitKey, PersistentId>>,
    recover_info: Mutex<HashMap<ExitKey, bool>>,
    exit_reasons: Mutex<HashMap<(String, u32, String), ExitReason>>,
}

impl MemoryExitReasonStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a session id for the next start of the ability.
    pub fn put_session_id(
        &self,
        access_token_id: u32,
        module_name: &str,
        ability_name: &str,
        id: PersistentId,
    ) {
        self.session_ids
            .lock()
            .expect("exit store lock poisoned")
            .insert(
                (access_token_id, module_name.to_string(), ability_name.to_string()),
                id,
            );
    }

    /// Marks recovery info as present for the ability key.
    pub fn put_recover_info(&self, access_token_id: u32, module_name: &str, ability_key: &str) {
        self.recover_info
            .lock()
            .expect("exit store lock poisoned")
            .insert(
                (access_token_id, module_name.to_string(), ability_key.to_string()),
                true,
            );
    }

    /// Records an exit reason for the ability key.
    pub fn put_exit_reason(
        &self,
        bundle_name: &str,
        access_token_id: u32,
        ability_key: &str,
        reason: ExitReason,
    ) {
        self.exit_reasons
            .lock()
            .expect("exit store lock poisoned")
            .insert(
                (bundle_name.to_string(), access_token_id, ability_key.to_string()),
                reason,
            );
    }
}

impl ExitReasonStore for MemoryExitReasonStore {
    fn session_id(
        &self,
        access_token_id: u32,
        module_name: &str,
        ability_name: &str,
    ) -> Option<PersistentId> {
        self.session_ids
            .lock()
            .expect("exit store lock poisoned")
            .get(&(access_token_id, module_name.to_string(), ability_name.to_string()))
            .copied()
    }

    fn recover_info(&self, access_token_id: u32, module_name: &str, ability_key: &str) -> bool {
        self.recover_info
            .lock()
            .expect("exit store lock poisoned")
            .get(&(access_token_id, module_name.to_string(), ability_key.to_string()))
            .copied()
            .unwrap_or(false)
    }

    fn delete_recover_info(&self, access_token_id: u32, module_name: &str, ability_key: &str) {
        self.recover_info
            .lock()
            .expect("exit store lock poisoned")
            .remove(&(access_token_id, module_name.to_string(), ability_key.to_string()));
    }

    fn exit_reason(
        &self,
        bundle_name: &str,
        access_token_id: u32,
        ability_key: &str,
    ) -> Option<ExitReason> {
        self.exit_reasons
            .lock()
            .expect("exit store lock poisoned")
            .get(&(bundle_name.to_string(), access_token_id, ability_key.to_string()))
            .cloned()
    }
}
