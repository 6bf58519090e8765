//! abilityd-runtime - the UI-ability lifecycle manager.
//!
//! This crate hosts [`manager::UiLifecycleManager`], the orchestrator
//! that owns the authoritative map from window-session id to ability
//! record and drives every lifecycle transition against two remote
//! parties: the scene/session compositor (through the
//! [`abilityd_core::session::SceneSession`] capability) and the
//! application process manager (through [`remote::AppService`]).
//!
//! # Runtime requirements
//!
//! A **multi-threaded tokio runtime** must be running. Transition
//! completions are spawned as tasks that re-acquire the manager lock, and
//! every supervised remote transaction arms a watchdog on the runtime's
//! timer ([`timer::TimerRegistry`]). The one blocking wait in the
//! component - the bounded prepare-terminate query - parks a plain worker
//! thread, never a runtime worker.
//!
//! # Modules
//!
//! - [`manager`]: the lifecycle manager and its protocol surface
//! - [`remote`]: trait seams toward the process manager and framework
//! - [`timer`]: keyed watchdog tasks with first-class cancellation

pub mod manager;
pub mod remote;
pub mod timer;

pub use manager::{
    RemoteServices, ReuseDecision, SessionExceptionCode, SpecifiedKey, UiLifecycleManager,
};
pub use remote::{
    AppInfo, AppService, AppServiceError, EventReporter, ExitReasonStore, MemoryExitReasonStore,
    NoopReporter, PermissionChecker, RequestResolver, SessionEventHandler, StaticPermissions,
    StatusBarDelegate,
};
pub use timer::{TimeoutKind, TimerRegistry};
