//! The UI-ability lifecycle manager.
//!
//! [`UiLifecycleManager`] owns the authoritative map from persistent
//! session id to ability record and coordinates every lifecycle
//! transition with the remote compositor and the application process
//! manager.
//!
//! # Concurrency model
//!
//! One coarse mutex guards the session map and all derived bookkeeping
//! (temp map, specified maps/queue, terminate list, counters). Every
//! public entry point takes the lock for its synchronous portion and
//! releases it before completion work runs: state-transition completions
//! are always submitted to the runtime as tasks that re-acquire the lock
//! themselves, so a slow remote round trip can never hold it. The single
//! blocking wait in the component is the bounded prepare-terminate query
//! (see [`UiLifecycleManager::prepare_terminate_ability`]).
//!
//! A multi-thread tokio runtime must be running: watchdogs and completion
//! tasks are spawned onto it.

mod call;
mod recovery;
mod reuse;
mod specified;
mod start;
mod transitions;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use abilityd_core::config::TimeoutConfig;
use abilityd_core::record::{AbilityRecord, Token, exit_info_ability_key};
use abilityd_core::request::{AbilityRequest, LaunchMode};
use abilityd_core::session::{PersistentId, SessionInfo, SessionToken};
use abilityd_core::state::{AbilityVisibilityState, AppState, LaunchReason};
use abilityd_core::want::ElementName;
use abilityd_core::{LifecycleError, LifecycleResult};
use tracing::{debug, info, warn};

use crate::remote::{
    AppInfo, AppService, EventReporter, ExitReasonStore, MemoryExitReasonStore, NoopReporter,
    PermissionChecker, RequestResolver, SessionEventHandler, StaticPermissions, StatusBarDelegate,
};
use crate::timer::TimerRegistry;

pub use recovery::SessionExceptionCode;
pub use reuse::ReuseDecision;
pub use specified::SpecifiedKey;

/// External collaborators the manager talks to.
#[derive(Clone)]
pub struct RemoteServices {
    /// Application process manager.
    pub app: Arc<dyn AppService>,
    /// Last-exit / recovery bookkeeping store.
    pub exit_store: Arc<dyn ExitReasonStore>,
    /// Permission verifier.
    pub permissions: Arc<dyn PermissionChecker>,
    /// Behavioural telemetry sink.
    pub reporter: Arc<dyn EventReporter>,
    /// Status-bar attachment delegate, when the device has one.
    pub status_bar: Option<Arc<dyn StatusBarDelegate>>,
    /// Want-to-request resolver for compositor-driven starts.
    pub resolver: Option<Arc<dyn RequestResolver>>,
}

impl RemoteServices {
    /// Bundles the process manager with no-op defaults for the rest.
    #[must_use]
    pub fn new(app: Arc<dyn AppService>) -> Self {
        Self {
            app,
            exit_store: Arc::new(MemoryExitReasonStore::new()),
            permissions: Arc::new(StaticPermissions::default()),
            reporter: Arc::new(NoopReporter),
            status_bar: None,
            resolver: None,
        }
    }
}

pub(crate) struct ManagerState {
    session_ability_map: HashMap<PersistentId, Arc<AbilityRecord>>,
    tmp_ability_map: HashMap<i64, Arc<AbilityRecord>>,
    terminate_ability_list: Vec<Arc<AbilityRecord>>,
    specified_ability_map: HashMap<SpecifiedKey, Arc<AbilityRecord>>,
    specified_request_map: HashMap<i32, AbilityRequest>,
    specified_info_queue: VecDeque<SpecifiedKey>,
    specified_request_id: i32,
    record_id_seq: i64,
    process_name_seq: u32,
    root_scene_session: Option<SessionToken>,
    session_handler: Option<Arc<dyn SessionEventHandler>>,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            session_ability_map: HashMap::new(),
            tmp_ability_map: HashMap::new(),
            terminate_ability_list: Vec::new(),
            specified_ability_map: HashMap::new(),
            specified_request_map: HashMap::new(),
            specified_info_queue: VecDeque::new(),
            specified_request_id: 0,
            record_id_seq: 0,
            process_name_seq: 0,
            root_scene_session: None,
            session_handler: None,
        }
    }

    fn next_record_id(&mut self) -> i64 {
        self.record_id_seq += 1;
        self.record_id_seq
    }

    fn next_specified_request_id(&mut self) -> i32 {
        let id = self.specified_request_id;
        self.specified_request_id += 1;
        id
    }

    fn next_process_name_index(&mut self) -> u32 {
        let index = self.process_name_seq;
        self.process_name_seq += 1;
        index
    }

    /// Terminating records are still addressable by token; they are
    /// searched ahead of the live map.
    fn find_record_by_token(&self, token: Token) -> Option<Arc<AbilityRecord>> {
        self.terminate_ability_list
            .iter()
            .find(|record| record.token() == token)
            .or_else(|| {
                self.session_ability_map
                    .values()
                    .find(|record| record.token() == token)
            })
            .cloned()
    }

    fn find_record_by_id(&self, record_id: i64) -> Option<Arc<AbilityRecord>> {
        self.session_ability_map
            .values()
            .find(|record| record.record_id() == record_id)
            .cloned()
    }

    fn contains_token(&self, token: Token) -> bool {
        self.session_ability_map
            .values()
            .any(|record| record.token() == token)
    }

    fn erase_ability_record(&mut self, record: &Arc<AbilityRecord>) {
        self.session_ability_map
            .retain(|_, existing| !Arc::ptr_eq(existing, record));
    }

    fn erase_specified_ability_record(&mut self, record: &Arc<AbilityRecord>) {
        let flag = record.specified_flag();
        let info = record.ability_info().clone();
        self.specified_ability_map.retain(|key, existing| {
            !(Arc::ptr_eq(existing, record)
                && key.ability_name == info.name
                && key.bundle_name == info.bundle_name
                && key.flag == flag)
        });
    }

    fn records_by_name(&self, element: &ElementName) -> Vec<Arc<AbilityRecord>> {
        self.session_ability_map
            .values()
            .filter(|record| {
                let local = record.ability_info().element();
                local == *element || local.without_module() == *element
            })
            .cloned()
            .collect()
    }
}

/// The lifecycle/session orchestrator.
///
/// See the [module documentation](self) for the concurrency contract.
pub struct UiLifecycleManager {
    user_id: i32,
    config: TimeoutConfig,
    services: RemoteServices,
    timers: Arc<TimerRegistry>,
    state: Mutex<ManagerState>,
}

impl UiLifecycleManager {
    /// Creates a manager for `user_id`.
    #[must_use]
    pub fn new(user_id: i32, config: TimeoutConfig, services: RemoteServices) -> Arc<Self> {
        Arc::new(Self {
            user_id,
            config,
            services,
            timers: Arc::new(TimerRegistry::new()),
            state: Mutex::new(ManagerState::new()),
        })
    }

    /// User this manager serves.
    #[must_use]
    pub const fn user_id(&self) -> i32 {
        self.user_id
    }

    /// Timeout budgets in force.
    #[must_use]
    pub const fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().expect("manager lock poisoned")
    }

    pub(crate) fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    pub(crate) fn services(&self) -> &RemoteServices {
        &self.services
    }

    /// Registers the compositor's root scene session, the fallback target
    /// for activations with no tracked caller.
    pub fn set_root_scene_session(&self, session: SessionToken) {
        self.state().root_scene_session = Some(session);
    }

    /// Registers the session ordering handler.
    pub fn set_session_handler(&self, handler: Arc<dyn SessionEventHandler>) {
        self.state().session_handler = Some(handler);
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether `token` belongs to a live (non-terminating) ability.
    #[must_use]
    pub fn is_contains_ability(&self, token: Token) -> bool {
        self.state().contains_token(token)
    }

    /// Record under `session_id`, if any.
    #[must_use]
    pub fn get_ability_record_by_id(&self, session_id: PersistentId) -> Option<Arc<AbilityRecord>> {
        self.state().session_ability_map.get(&session_id).cloned()
    }

    /// Record owning `token`, searching terminating records too.
    #[must_use]
    pub fn get_ability_record_by_token(&self, token: Token) -> Option<Arc<AbilityRecord>> {
        self.state().find_record_by_token(token)
    }

    /// Record bound to the session described by `session_info`.
    ///
    /// The descriptor must carry a session token; an unbound descriptor
    /// addresses nothing.
    #[must_use]
    pub fn get_ability_record_by_session_info(
        &self,
        session_info: &SessionInfo,
    ) -> Option<Arc<AbilityRecord>> {
        if !session_info.has_session_token() {
            warn!(persistent_id = session_info.persistent_id, "session info has no token");
            return None;
        }
        self.get_ability_record_by_id(session_info.persistent_id)
    }

    /// Records matching `element`, with or without its module name.
    #[must_use]
    pub fn get_ability_records_by_name(&self, element: &ElementName) -> Vec<Arc<AbilityRecord>> {
        self.state().records_by_name(element)
    }

    /// Session id owning `token`, or `None`.
    #[must_use]
    pub fn get_session_id_by_ability_token(&self, token: Token) -> Option<PersistentId> {
        self.state()
            .session_ability_map
            .iter()
            .find(|(_, record)| record.token() == token)
            .map(|(id, _)| *id)
    }

    /// Number of live instances of the given ability.
    #[must_use]
    pub fn check_ability_number(
        &self,
        bundle_name: &str,
        ability_name: &str,
        module_name: &str,
    ) -> usize {
        let state = self.state();
        state
            .session_ability_map
            .values()
            .filter(|record| {
                let info = record.ability_info();
                info.bundle_name == bundle_name
                    && info.name == ability_name
                    && info.module_name == module_name
            })
            .count()
    }

    /// Sorted, deduplicated names of live abilities owned by `uid`,
    /// optionally narrowed to one pid. STANDARD instances are suffixed
    /// with their persistent id so each counts separately.
    #[must_use]
    pub fn get_active_ability_list(&self, uid: i32, pid: Option<i32>) -> Vec<String> {
        let state = self.state();
        let mut names: Vec<String> = state
            .session_ability_map
            .values()
            .filter(|record| pid.map_or(true, |pid| record.pid() == pid))
            .filter(|record| {
                record.ability_info().uid == uid && !record.ability_info().name.is_empty()
            })
            .map(|record| {
                let info = record.ability_info();
                let standard = info.launch_mode == LaunchMode::Standard;
                exit_info_ability_key(info, record.persistent_id(), standard)
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Number of records awaiting terminate completion.
    #[must_use]
    pub fn terminating_ability_count(&self) -> usize {
        self.state().terminate_ability_list.len()
    }

    /// Number of registered specified-mode instances.
    #[must_use]
    pub fn specified_ability_count(&self) -> usize {
        self.state().specified_ability_map.len()
    }

    /// Whether the session exists and has no transition in flight.
    #[must_use]
    pub fn get_ability_state_by_persistent_id(&self, persistent_id: PersistentId) -> bool {
        self.state()
            .session_ability_map
            .get(&persistent_id)
            .is_some_and(|record| {
                record.pending_state() == abilityd_core::state::PendingState::Initial
            })
    }

    /// Looks up an already-started instance for `request`; on a hit, the
    /// caller is registered on it and the launch reason becomes `Call`.
    #[must_use]
    pub fn is_ability_started(&self, request: &AbilityRequest) -> Option<Arc<AbilityRecord>> {
        let state = self.state();
        let decision = reuse::resolve_persistent_id(&state, request);
        let persistent_id = decision.persistent_id?;
        let record = state.session_ability_map.get(&persistent_id).cloned()?;
        record.add_caller_record(request.caller_token, request.request_code, String::new(), 0);
        record.set_launch_reason(LaunchReason::Call);
        Some(record)
    }

    // ------------------------------------------------------------------
    // Compositor-driven reconciliation and app-level reports
    // ------------------------------------------------------------------

    /// Reconciles the compositor's session list with the authoritative
    /// map: refreshes session tokens of known sessions, batch-closes
    /// records the compositor no longer lists, and returns the ids the
    /// manager does not know.
    pub fn update_session_info_by_scb(
        self: &Arc<Self>,
        mut session_infos: Vec<SessionInfo>,
    ) -> Vec<PersistentId> {
        let mut stale = Vec::new();
        {
            let state = self.state();
            for (session_id, record) in &state.session_ability_map {
                match session_infos
                    .iter()
                    .position(|info| info.persistent_id == *session_id)
                {
                    Some(position) => {
                        let info = session_infos.swap_remove(position);
                        record.update_session_token(info.session_token);
                    },
                    None => stale.push(Arc::clone(record)),
                }
            }
        }
        let unknown: Vec<PersistentId> =
            session_infos.iter().map(|info| info.persistent_id).collect();

        if !stale.is_empty() {
            info!(count = stale.len(), "closing sessions dropped by the compositor");
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                for record in stale {
                    if let Err(err) = manager.close_ui_ability(&record, -1, None, false) {
                        warn!(record_id = record.record_id(), %err, "batch close failed");
                    }
                }
            });
        }
        unknown
    }

    /// Propagates a process-level state report onto matching records.
    pub fn on_app_state_changed(&self, app_info: &AppInfo) {
        let state = self.state();
        let matches = |record: &Arc<AbilityRecord>| {
            record.process_name() == app_info.process_name
                || record.ability_info().bundle_name == app_info.process_name
        };
        match app_info.state {
            AppState::Terminated | AppState::End => {
                for record in &state.terminate_ability_list {
                    if matches(record) {
                        record.set_app_state(app_info.state);
                    }
                }
            },
            AppState::ColdStart => {
                if let Some(record) = state.session_ability_map.values().find(|r| matches(r)) {
                    record.set_cold_start_flag(true);
                }
            },
            _ => {
                for record in state.session_ability_map.values() {
                    if matches(record) {
                        record.set_app_state(app_info.state);
                    }
                }
            },
        }
    }

    /// Deletes recovery bookkeeping for every record of an uninstalled
    /// bundle.
    pub fn uninstall_app(&self, bundle_name: &str, uid: i32) {
        let state = self.state();
        for record in state.session_ability_map.values() {
            let info = record.ability_info();
            if info.bundle_name != bundle_name || info.uid != uid {
                continue;
            }
            let standard = info.launch_mode == LaunchMode::Standard;
            let key = exit_info_ability_key(info, record.persistent_id(), standard);
            self.services
                .exit_store
                .delete_recover_info(info.access_token_id, &info.module_name, &key);
        }
    }

    /// Flags every record of `bundle_name` as framework-restarted and
    /// notifies the compositor exception path for each.
    pub fn sign_restart_app_flag(&self, bundle_name: &str, is_app_recovery: bool) {
        let mut state = self.state();
        let records: Vec<Arc<AbilityRecord>> = state
            .session_ability_map
            .values()
            .filter(|record| record.ability_info().bundle_name == bundle_name)
            .cloned()
            .collect();
        let reason = if is_app_recovery { "appRecovery" } else { "onAbilityDied" };
        for record in records {
            record.set_restart_app_flag(true);
            self.notify_scb_exception(
                &mut state,
                &record,
                recovery::SessionExceptionCode::Died,
                reason,
            );
        }
    }

    // ------------------------------------------------------------------
    // Visibility and front-of-stack operations
    // ------------------------------------------------------------------

    /// Self-service visibility toggle for status-bar-attached abilities.
    ///
    /// # Errors
    ///
    /// Rejects unknown tokens, callers other than the owning application,
    /// and abilities not started in a status-bar process mode.
    pub fn change_ability_visibility(
        &self,
        token: Token,
        is_show: bool,
        calling_token_id: u32,
    ) -> LifecycleResult<()> {
        let state = self.state();
        let record = state
            .find_record_by_token(token)
            .ok_or(LifecycleError::TokenNotFound(token.raw()))?;
        if calling_token_id != record.ability_info().access_token_id {
            return Err(LifecycleError::NotSelfApplication);
        }
        let session_info = record.session_info().ok_or(LifecycleError::InvalidSessionInfo)?;
        let attach_to_status_bar = session_info
            .process_options
            .as_ref()
            .is_some_and(|options| options.process_mode.is_attach_to_status_bar_mode());
        if !attach_to_status_bar {
            return Err(LifecycleError::StartOptionsCheckFailed);
        }
        let session_token = session_info
            .session_token
            .clone()
            .ok_or(LifecycleError::InvalidSessionInfo)?;
        session_token
            .session()
            .change_visibility_with_status_bar(&session_info, is_show)?;
        Ok(())
    }

    /// Compositor-driven visibility change for a session.
    ///
    /// # Errors
    ///
    /// Rejects unknown sessions and abilities whose visibility state was
    /// never initialized.
    pub fn change_ui_ability_visibility_by_scb(
        self: &Arc<Self>,
        session_info: &SessionInfo,
        is_show: bool,
    ) -> LifecycleResult<()> {
        let mut state = self.state();
        let record = state
            .session_ability_map
            .get(&session_info.persistent_id)
            .cloned()
            .ok_or(LifecycleError::SessionNotFound(session_info.persistent_id))?;
        let visibility = record.visibility_state();
        if matches!(
            visibility,
            AbilityVisibilityState::Unspecified | AbilityVisibilityState::Initial
        ) {
            return Err(LifecycleError::VisibilityCheckFailed);
        }
        info!(
            persistent_id = session_info.persistent_id,
            is_show, "change ability visibility"
        );
        if is_show {
            record.set_visibility_state(AbilityVisibilityState::ForegroundShow);
            self.process_foreground_locked(&mut state, &record, 0);
        } else {
            record.set_visibility_state(AbilityVisibilityState::ForegroundHide);
        }
        Ok(())
    }

    /// Activates an existing session through the root scene session.
    ///
    /// # Errors
    ///
    /// Requires a registered root session and a tracked, session-bound
    /// record.
    pub fn move_mission_to_front(
        &self,
        session_id: PersistentId,
        window_mode: Option<i32>,
    ) -> LifecycleResult<()> {
        let state = self.state();
        let root = state
            .root_scene_session
            .clone()
            .ok_or(LifecycleError::RootSessionUnavailable)?;
        let record = state
            .session_ability_map
            .get(&session_id)
            .cloned()
            .ok_or(LifecycleError::SessionNotFound(session_id))?;
        if let Some(mode) = window_mode {
            record.set_window_mode(mode);
        }
        let mut session_info = record.session_info().ok_or(LifecycleError::InvalidSessionInfo)?;
        session_info.process_options = None;
        session_info.can_start_ability_from_background = true;
        record.set_session_info(session_info.clone());
        debug!(session_id, "move mission to front via root session");
        root.session().pending_activation(&session_info)?;
        Ok(())
    }

    /// Renders the session map for diagnostics.
    #[must_use]
    pub fn dump(&self) -> Vec<String> {
        let snapshot: Vec<(PersistentId, Arc<AbilityRecord>)> = {
            let state = self.state();
            state
                .session_ability_map
                .iter()
                .map(|(id, record)| (*id, Arc::clone(record)))
                .collect()
        };
        let mut lines = vec![format!("User ID #{}", self.user_id), "  sessions:{".to_string()];
        for (session_id, record) in snapshot {
            let info = record.ability_info();
            let session_name = record
                .session_info()
                .map(|session| session.session_name)
                .unwrap_or_default();
            lines.push(format!(
                "    Session ID #{session_id}  name #[{session_name}]  element #[{}]  state #{}  affinity #[{}]",
                info.element().uri(),
                record.ability_state(),
                record.mission_affinity(),
            ));
        }
        lines.push(" }".to_string());
        lines
    }

    pub(crate) fn generate_process_name_for_new_process_mode(
        &self,
        state: &mut ManagerState,
        info: &abilityd_core::request::AbilityInfo,
    ) -> String {
        let index = state.next_process_name_index();
        let name = format!(
            "{}:{}:{}:{}",
            info.bundle_name, info.module_name, info.name, index
        );
        info!(process_name = %name, "generated process name");
        name
    }

    pub(crate) fn update_process_name(
        &self,
        state: &mut ManagerState,
        record: &Arc<AbilityRecord>,
        session_info: &SessionInfo,
    ) {
        let Some(options) = session_info.process_options.as_ref() else {
            return;
        };
        if !options.process_mode.is_new_process_mode() {
            return;
        }
        let name = if options.process_name.is_empty() {
            self.generate_process_name_for_new_process_mode(state, record.ability_info())
        } else {
            options.process_name.clone()
        };
        record.set_process_name(name);
    }

    pub(crate) fn pre_create_process_name(&self, state: &mut ManagerState, request: &mut AbilityRequest) {
        let needs_name = request
            .process_options
            .as_ref()
            .is_some_and(|options| options.process_mode.is_new_process_mode());
        if !needs_name {
            return;
        }
        let name = self.generate_process_name_for_new_process_mode(state, &request.ability_info);
        if let Some(options) = request.process_options.as_mut() {
            options.process_name.clone_from(&name);
        }
        request.ability_info.process = name;
    }
}

/// Whether the request names a new-process mode; new-process placement
/// takes priority over the isolation-process attribute.
pub(crate) fn is_new_process_mode_request(request: &AbilityRequest) -> bool {
    request
        .process_options
        .as_ref()
        .is_some_and(|options| options.process_mode.is_new_process_mode())
}
