//! Ability records.
//!
//! An [`AbilityRecord`] represents one instantiated ability. Records are
//! shared (`Arc`) between the authoritative session map, the terminate
//! list, the specified-reuse map, and in-flight task closures; an instance
//! is only truly destroyed once every such reference is dropped. Mutable
//! state lives behind an interior lock so a record can be mutated from
//! completion tasks without holding the manager lock.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::call::{CallConnection, CallContainer, Callee};
use crate::remote::AbilityScheduler;
use crate::request::{AbilityInfo, AbilityRequest, CollaboratorType, LaunchMode};
use crate::session::SessionInfo;
use crate::state::{
    AbilityState, AbilityVisibilityState, AppState, ExitReason, LaunchReason, PendingState,
};
use crate::want::{PARAM_CALLER_TOKEN, PARAM_MISSION_AFFINITY, Want, WantValue};

/// Ability state saved by the remote side when it backgrounds.
pub type SavedStateData = std::collections::HashMap<String, WantValue>;

/// Opaque identity handle exchanged with remote parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    /// Wraps a raw token value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One caller binding: who started the ability and how to route results.
#[derive(Debug, Clone)]
pub struct CallerRecord {
    /// Token of the caller, when the caller is a tracked ability.
    pub caller_token: Option<Token>,
    /// Request code the caller expects its result under.
    pub request_code: i32,
    /// Composite distributed-routing id captured before the routing params
    /// were stripped from the want.
    pub src_ability_id: String,
    /// Access token of the calling identity.
    pub calling_token_id: u32,
    /// Result saved for this caller, pending delivery.
    pub result: Option<(i32, Want)>,
}

struct RecordInner {
    current_state: AbilityState,
    pending_state: PendingState,
    visibility_state: AbilityVisibilityState,
    want: Want,
    session_info: Option<SessionInfo>,
    scheduler: Option<Arc<dyn AbilityScheduler>>,
    callers: Vec<CallerRecord>,
    calls: CallContainer,
    specified_flag: String,
    launch_reason: LaunchReason,
    last_exit_reason: Option<ExitReason>,
    recovery_info: bool,
    restart_time: i64,
    process_name: String,
    app_state: Option<AppState>,
    window_mode: Option<i32>,
    scene_flag: u32,
    saved_state: Option<SavedStateData>,
    specify_token_id: u32,
    is_new_want: bool,
    started_by_call: bool,
    start_to_foreground: bool,
    start_to_background: bool,
    loading: bool,
    terminating: bool,
    minimize_from_user: bool,
    clear_session_flag: bool,
    restart_app_flag: bool,
    cold_start_flag: bool,
    pid: i32,
}

/// One instantiated ability.
pub struct AbilityRecord {
    record_id: i64,
    token: Token,
    ability_info: AbilityInfo,
    collaborator_type: CollaboratorType,
    mission_affinity: String,
    app_index: i32,
    owner_user_id: i32,
    inner: Mutex<RecordInner>,
}

impl AbilityRecord {
    /// Creates a record from a start request.
    ///
    /// `record_id` must come from the manager's monotonic counter; the
    /// record's token is derived from it.
    #[must_use]
    pub fn new(record_id: i64, request: &AbilityRequest, owner_user_id: i32) -> Self {
        let process_name = if request.ability_info.process.is_empty() {
            request.ability_info.bundle_name.clone()
        } else {
            request.ability_info.process.clone()
        };
        Self {
            record_id,
            token: Token::new(record_id.unsigned_abs()),
            ability_info: request.ability_info.clone(),
            collaborator_type: request.collaborator_type,
            mission_affinity: request.want.string_param(PARAM_MISSION_AFFINITY),
            app_index: request.app_index(),
            owner_user_id,
            inner: Mutex::new(RecordInner {
                current_state: AbilityState::Initial,
                pending_state: PendingState::Initial,
                visibility_state: AbilityVisibilityState::Unspecified,
                want: request.want.clone(),
                session_info: None,
                scheduler: None,
                callers: Vec::new(),
                calls: CallContainer::default(),
                specified_flag: request.specified_flag.clone(),
                launch_reason: LaunchReason::StartAbility,
                last_exit_reason: None,
                recovery_info: false,
                restart_time: chrono::Utc::now().timestamp_millis(),
                process_name,
                app_state: None,
                window_mode: None,
                scene_flag: 0,
                saved_state: None,
                specify_token_id: request.specify_token_id,
                is_new_want: false,
                started_by_call: request.is_call_request(),
                start_to_foreground: false,
                start_to_background: false,
                loading: false,
                terminating: false,
                minimize_from_user: false,
                clear_session_flag: false,
                restart_app_flag: false,
                cold_start_flag: false,
                pid: 0,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, RecordInner> {
        self.inner.lock().expect("record lock poisoned")
    }

    /// Monotonic record id.
    #[must_use]
    pub const fn record_id(&self) -> i64 {
        self.record_id
    }

    /// Identity token exchanged with remote parties.
    #[must_use]
    pub const fn token(&self) -> Token {
        self.token
    }

    /// Static metadata of the ability.
    #[must_use]
    pub const fn ability_info(&self) -> &AbilityInfo {
        &self.ability_info
    }

    /// Collaborator kind the record was created under.
    #[must_use]
    pub const fn collaborator_type(&self) -> CollaboratorType {
        self.collaborator_type
    }

    /// Mission affinity captured from the creating want.
    #[must_use]
    pub fn mission_affinity(&self) -> &str {
        &self.mission_affinity
    }

    /// Application clone index captured from the creating want.
    #[must_use]
    pub const fn app_index(&self) -> i32 {
        self.app_index
    }

    /// User the record belongs to.
    #[must_use]
    pub const fn owner_user_id(&self) -> i32 {
        self.owner_user_id
    }

    /// Token id the ability should report as its specifier.
    #[must_use]
    pub fn specify_token_id(&self) -> u32 {
        self.inner().specify_token_id
    }

    /// Updates the specifier token id (warm reuse carries a fresh one).
    pub fn set_specify_token_id(&self, id: u32) {
        self.inner().specify_token_id = id;
    }

    // ------------------------------------------------------------------
    // Lifecycle state
    // ------------------------------------------------------------------

    /// Current lifecycle state.
    #[must_use]
    pub fn ability_state(&self) -> AbilityState {
        self.inner().current_state
    }

    /// Sets the lifecycle state.
    pub fn set_ability_state(&self, state: AbilityState) {
        self.inner().current_state = state;
    }

    /// Whether the record is exactly in `state`.
    #[must_use]
    pub fn is_ability_state(&self, state: AbilityState) -> bool {
        self.inner().current_state == state
    }

    /// Whether a close has begun for this record.
    ///
    /// Set as soon as a close is accepted, before the state machine reaches
    /// [`AbilityState::Terminating`]; a foregrounded record may still be
    /// backgrounding its way toward termination while this is set.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.inner().terminating
    }

    /// Marks the record as closing.
    pub fn set_terminating_flag(&self) {
        self.inner().terminating = true;
    }

    /// Whether the record is foreground or foregrounding.
    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.ability_state().is_foreground()
    }

    /// Queued transition intent.
    #[must_use]
    pub fn pending_state(&self) -> PendingState {
        self.inner().pending_state
    }

    /// Replaces the queued transition intent (last writer wins).
    pub fn set_pending_state(&self, state: PendingState) {
        self.inner().pending_state = state;
    }

    /// Visibility toward the compositor.
    #[must_use]
    pub fn visibility_state(&self) -> AbilityVisibilityState {
        self.inner().visibility_state
    }

    /// Sets the visibility state.
    pub fn set_visibility_state(&self, state: AbilityVisibilityState) {
        self.inner().visibility_state = state;
    }

    // ------------------------------------------------------------------
    // Want and session binding
    // ------------------------------------------------------------------

    /// Clone of the record's current want.
    #[must_use]
    pub fn want(&self) -> Want {
        self.inner().want.clone()
    }

    /// Replaces the record's want.
    pub fn set_want(&self, want: Want) {
        self.inner().want = want;
    }

    /// Drops descriptor references held by the record's want.
    pub fn close_want_fds(&self) {
        self.inner().want.close_all_fds();
    }

    /// Drops descriptor references held by the bound session's want.
    pub fn close_session_want_fds(&self) {
        if let Some(info) = self.inner().session_info.as_mut() {
            info.want.close_all_fds();
        }
    }

    /// Saves the ability state reported with a background transaction.
    pub fn save_ability_state(&self, data: SavedStateData) {
        self.inner().saved_state = Some(data);
    }

    /// The last saved ability state, if any.
    #[must_use]
    pub fn saved_ability_state(&self) -> Option<SavedStateData> {
        self.inner().saved_state.clone()
    }

    /// Clone of the bound session descriptor, if any.
    #[must_use]
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.inner().session_info.clone()
    }

    /// Binds a session descriptor.
    pub fn set_session_info(&self, info: SessionInfo) {
        self.inner().session_info = Some(info);
    }

    /// Refreshes the session token kept in the bound descriptor.
    pub fn update_session_token(&self, token: Option<crate::session::SessionToken>) {
        if let Some(info) = self.inner().session_info.as_mut() {
            info.session_token = token;
        }
    }

    /// Persistent id of the bound session, if any.
    #[must_use]
    pub fn persistent_id(&self) -> Option<i32> {
        self.inner().session_info.as_ref().map(|s| s.persistent_id)
    }

    // ------------------------------------------------------------------
    // Scheduler attachment
    // ------------------------------------------------------------------

    /// Proxy to the attached ability thread, if the process has attached.
    #[must_use]
    pub fn scheduler(&self) -> Option<Arc<dyn AbilityScheduler>> {
        self.inner().scheduler.clone()
    }

    /// Binds the ability-thread proxy.
    pub fn set_scheduler(&self, scheduler: Arc<dyn AbilityScheduler>) {
        self.inner().scheduler = Some(scheduler);
    }

    /// Whether the record has an attached, schedulable ability thread.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner().scheduler.is_some()
    }

    // ------------------------------------------------------------------
    // Caller chain
    // ------------------------------------------------------------------

    /// Appends a caller binding.
    pub fn add_caller_record(
        &self,
        caller_token: Option<Token>,
        request_code: i32,
        src_ability_id: String,
        calling_token_id: u32,
    ) {
        tracing::debug!(record_id = self.record_id, request_code, "add caller record");
        self.inner().callers.push(CallerRecord {
            caller_token,
            request_code,
            src_ability_id,
            calling_token_id,
            result: None,
        });
    }

    /// Snapshot of the caller bindings.
    #[must_use]
    pub fn caller_records(&self) -> Vec<CallerRecord> {
        self.inner().callers.clone()
    }

    /// Saves `result_code`/`result_want` for every caller that started for
    /// a result, stripping the reserved caller-token parameter first.
    pub fn save_result_to_callers(&self, result_code: i32, result_want: &Want) {
        let mut want = result_want.clone();
        want.remove_param(PARAM_CALLER_TOKEN);
        let mut inner = self.inner();
        for caller in &mut inner.callers {
            if caller.request_code > 0 {
                caller.result = Some((result_code, want.clone()));
            }
        }
    }

    /// Takes the saved results, leaving the caller bindings in place.
    #[must_use]
    pub fn take_caller_results(&self) -> Vec<(Option<Token>, i32, i32, Want)> {
        let mut inner = self.inner();
        let mut results = Vec::new();
        for caller in &mut inner.callers {
            if let Some((code, want)) = caller.result.take() {
                results.push((caller.caller_token, caller.request_code, code, want));
            }
        }
        results
    }

    // ------------------------------------------------------------------
    // Call bindings
    // ------------------------------------------------------------------

    /// Registers a call connection; returns whether the callee object was
    /// already available and delivered.
    pub fn resolve_connection(&self, connection: &Arc<dyn CallConnection>) -> bool {
        self.inner().calls.resolve(connection)
    }

    /// Delivers the callee object produced by the remote side.
    pub fn on_call_request_done(&self, callee: Arc<dyn Callee>) {
        self.inner().calls.call_request_done(callee);
    }

    /// Whether `connection` is bound to this record.
    #[must_use]
    pub fn is_exist_connection(&self, connection: &Arc<dyn CallConnection>) -> bool {
        self.inner().calls.is_exist_connection(connection)
    }

    /// Releases one call connection; returns whether it was bound here.
    pub fn release_call(&self, connection: &Arc<dyn CallConnection>) -> bool {
        self.inner().calls.release(connection)
    }

    /// Whether a call request must still be issued once the record is
    /// ready.
    #[must_use]
    pub fn is_need_to_call_request(&self) -> bool {
        self.inner().calls.is_need_to_call_request()
    }

    /// Issues the call request to the attached scheduler, if any.
    pub fn call_request(&self) {
        match self.scheduler() {
            Some(scheduler) => scheduler.call_request(),
            None => tracing::warn!(record_id = self.record_id, "call request with no scheduler"),
        }
    }

    // ------------------------------------------------------------------
    // Flags and bookkeeping
    // ------------------------------------------------------------------

    /// Specified-mode flag the record was tagged with.
    #[must_use]
    pub fn specified_flag(&self) -> String {
        self.inner().specified_flag.clone()
    }

    /// Tags the record with a specified-mode flag.
    pub fn set_specified_flag(&self, flag: String) {
        self.inner().specified_flag = flag;
    }

    /// Why the ability was launched.
    #[must_use]
    pub fn launch_reason(&self) -> LaunchReason {
        self.inner().launch_reason
    }

    /// Sets the launch reason.
    pub fn set_launch_reason(&self, reason: LaunchReason) {
        self.inner().launch_reason = reason;
    }

    /// Previous-exit record delivered on relaunch, if any.
    #[must_use]
    pub fn last_exit_reason(&self) -> Option<ExitReason> {
        self.inner().last_exit_reason.clone()
    }

    /// Stores the previous-exit record.
    pub fn set_last_exit_reason(&self, reason: ExitReason) {
        self.inner().last_exit_reason = Some(reason);
    }

    /// Whether recovery info existed for this ability at creation.
    #[must_use]
    pub fn recovery_info(&self) -> bool {
        self.inner().recovery_info
    }

    /// Records whether recovery info existed at creation.
    pub fn update_recovery_info(&self, has_info: bool) {
        self.inner().recovery_info = has_info;
    }

    /// Wall-clock instant (milliseconds) of the last (re)start, used to
    /// pick the most recently used instance during reuse resolution.
    #[must_use]
    pub fn restart_time(&self) -> i64 {
        self.inner().restart_time
    }

    /// Stamps the restart time with the current instant.
    pub fn touch_restart_time(&self) {
        self.inner().restart_time = chrono::Utc::now().timestamp_millis();
    }

    /// Sets an explicit restart time.
    pub fn set_restart_time(&self, millis: i64) {
        self.inner().restart_time = millis;
    }

    /// Name of the process hosting the ability.
    #[must_use]
    pub fn process_name(&self) -> String {
        self.inner().process_name.clone()
    }

    /// Overrides the hosting process name (new-process modes).
    pub fn set_process_name(&self, name: String) {
        self.inner().process_name = name;
    }

    /// Last process-level state reported by the process manager.
    #[must_use]
    pub fn app_state(&self) -> Option<AppState> {
        self.inner().app_state
    }

    /// Records the process-level state.
    pub fn set_app_state(&self, state: AppState) {
        self.inner().app_state = Some(state);
    }

    /// Window-mode override, if one was saved.
    #[must_use]
    pub fn window_mode(&self) -> Option<i32> {
        self.inner().window_mode
    }

    /// Saves a window-mode override.
    pub fn set_window_mode(&self, mode: i32) {
        self.inner().window_mode = Some(mode);
    }

    /// Clears the window-mode override.
    pub fn remove_window_mode(&self) {
        self.inner().window_mode = None;
    }

    /// Scene flag to use for the next foreground.
    #[must_use]
    pub fn scene_flag(&self) -> u32 {
        self.inner().scene_flag
    }

    /// Sets the scene flag for the next foreground.
    pub fn set_scene_flag(&self, flag: u32) {
        self.inner().scene_flag = flag;
    }

    /// Whether the latest start reused this record with a fresh want.
    #[must_use]
    pub fn is_new_want(&self) -> bool {
        self.inner().is_new_want
    }

    /// Marks whether the latest start carries a fresh want.
    pub fn set_is_new_want(&self, is_new_want: bool) {
        self.inner().is_new_want = is_new_want;
    }

    /// Whether the record was created by a call binding.
    #[must_use]
    pub fn is_started_by_call(&self) -> bool {
        self.inner().started_by_call
    }

    /// Marks the record as created by a call binding.
    pub fn set_started_by_call(&self, value: bool) {
        self.inner().started_by_call = value;
    }

    /// Whether a call start still owes a foreground move.
    #[must_use]
    pub fn is_start_to_foreground(&self) -> bool {
        self.inner().start_to_foreground
    }

    /// Sets the pending call-to-foreground marker.
    pub fn set_start_to_foreground(&self, value: bool) {
        self.inner().start_to_foreground = value;
    }

    /// Whether a call start still owes a background move.
    #[must_use]
    pub fn is_start_to_background(&self) -> bool {
        self.inner().start_to_background
    }

    /// Sets the pending call-to-background marker.
    pub fn set_start_to_background(&self, value: bool) {
        self.inner().start_to_background = value;
    }

    /// Whether a process load is in flight for this record.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner().loading
    }

    /// Marks whether a process load is in flight.
    pub fn set_loading(&self, loading: bool) {
        self.inner().loading = loading;
    }

    /// Whether the last minimize was user-driven.
    #[must_use]
    pub fn minimize_from_user(&self) -> bool {
        self.inner().minimize_from_user
    }

    /// Records whether the current minimize is user-driven.
    pub fn set_minimize_reason(&self, from_user: bool) {
        self.inner().minimize_from_user = from_user;
    }

    /// Whether the close was requested with session clearing.
    #[must_use]
    pub fn clear_session_flag(&self) -> bool {
        self.inner().clear_session_flag
    }

    /// Marks the close as session-clearing.
    pub fn set_clear_session_flag(&self, value: bool) {
        self.inner().clear_session_flag = value;
    }

    /// Whether the record is being restarted by the framework.
    #[must_use]
    pub fn restart_app_flag(&self) -> bool {
        self.inner().restart_app_flag
    }

    /// Flags the record as framework-restarted.
    pub fn set_restart_app_flag(&self, value: bool) {
        self.inner().restart_app_flag = value;
    }

    /// Whether the hosting process cold started.
    #[must_use]
    pub fn cold_start_flag(&self) -> bool {
        self.inner().cold_start_flag
    }

    /// Marks the hosting process as cold started.
    pub fn set_cold_start_flag(&self, value: bool) {
        self.inner().cold_start_flag = value;
    }

    /// Pid of the hosting process, `0` before attach.
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.inner().pid
    }

    /// Records the hosting process pid.
    pub fn set_pid(&self, pid: i32) {
        self.inner().pid = pid;
    }
}

impl fmt::Debug for AbilityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilityRecord")
            .field("record_id", &self.record_id)
            .field("element", &self.ability_info.element().uri())
            .field("state", &self.ability_state())
            .finish_non_exhaustive()
    }
}

/// Derives the key under which exit/recovery info is stored for a record:
/// STANDARD-mode abilities get the persistent id appended so each instance
/// keeps its own entry.
#[must_use]
pub fn exit_info_ability_key(
    info: &AbilityInfo,
    persistent_id: Option<i32>,
    standard: bool,
) -> String {
    match persistent_id {
        Some(id) if standard => format!("{}{id}", info.name),
        _ => info.name.clone(),
    }
}

/// Matching predicate for reuse resolution: launch mode, element, and
/// clone index must all agree.
#[must_use]
pub fn check_properties(
    record: &AbilityRecord,
    request: &AbilityRequest,
    expected_mode: LaunchMode,
) -> bool {
    let info = record.ability_info();
    info.launch_mode == expected_mode
        && request.ability_info.name == info.name
        && request.ability_info.bundle_name == info.bundle_name
        && request.ability_info.module_name == info.module_name
        && request.app_index() == record.app_index()
}
