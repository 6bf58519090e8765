//! abilityd-core - domain types for the UI-ability lifecycle engine.
//!
//! This crate holds everything the lifecycle runtime reasons about without
//! touching an executor: intent descriptors ([`want::Want`]), lifecycle
//! state machines ([`state`]), instantiated abilities ([`record`]), start
//! requests ([`request`]), window-session descriptors and the compositor
//! capability seam ([`session`]), call-binding primitives ([`call`]), and
//! the trait seams toward application processes ([`remote`]).
//!
//! The orchestrator that owns the authoritative session map lives in
//! `abilityd-runtime`; it consumes these types under a single coarse lock
//! and is the only writer of record state.
//!
//! # Modules
//!
//! - [`call`]: call-binding container and connection traits
//! - [`config`]: timeout budgets for remote lifecycle transactions
//! - [`error`]: lifecycle error taxonomy
//! - [`record`]: ability records and the reuse matching predicate
//! - [`remote`]: ability-thread and framework-callback seams
//! - [`request`]: start requests and static ability metadata
//! - [`session`]: session descriptors and the scene-session capability
//! - [`state`]: lifecycle/pending/transaction state machines
//! - [`want`]: intent descriptor with typed parameter bag

pub mod call;
pub mod config;
pub mod error;
pub mod record;
pub mod remote;
pub mod request;
pub mod session;
pub mod state;
pub mod want;

pub use call::{CallConnection, CallContainer, Callee, ResolveOutcome};
pub use config::TimeoutConfig;
pub use error::{LifecycleError, LifecycleResult};
pub use record::{
    AbilityRecord, CallerRecord, SavedStateData, Token, check_properties, exit_info_ability_key,
};
pub use remote::{AbilityInfoCallback, AbilityScheduler, SpecifiedRequestCodes};
pub use request::{
    AbilityInfo, AbilityRequest, AbilityType, BundleType, CallType, CollaboratorType, LaunchMode,
    ProcessMode, ProcessOptions, StartSetting,
};
pub use session::{
    CallToState, PersistentId, SceneSession, SceneSessionError, SessionInfo, SessionToken,
};
pub use state::{
    AbilityState, AbilityVisibilityState, AppState, ExitCause, ExitReason, LaunchReason,
    PendingState, TransactionState,
};
pub use want::{ElementName, Want, WantValue};
