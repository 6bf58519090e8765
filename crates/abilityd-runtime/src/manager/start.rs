//! Start and attach protocol.
//!
//! A start request either lands directly in [`UiLifecycleManager::start_ui_ability`]
//! (the compositor already assigned a session) or goes through
//! [`UiLifecycleManager::notify_scb_to_start_ui_ability`], which resolves
//! reuse, builds a session descriptor, and asks the compositor to drive
//! the activation. The compositor then calls back with the session, the
//! process attaches, and the foreground transaction is scheduled.

use std::sync::Arc;

use abilityd_core::record::{AbilityRecord, Token, exit_info_ability_key};
use abilityd_core::remote::AbilityScheduler;
use abilityd_core::request::{AbilityRequest, BundleType, LaunchMode};
use abilityd_core::session::{PersistentId, SessionInfo};
use abilityd_core::state::{LaunchReason, PendingState};
use abilityd_core::want::{
    DEFAULT_DMS_MISSION_ID, FLAG_ABILITY_CONTINUATION, PARAM_CALL_TO_FOREGROUND,
    PARAM_CALLER_TOKEN, PARAM_DMS_MISSION_ID, PARAM_DMS_PERSISTENT_ID, PARAM_DMS_SRC_NETWORK_ID,
    PARAM_FOR_RESULT,
};
use abilityd_core::{LifecycleError, LifecycleResult};
use tracing::{debug, info, warn};

use super::{ManagerState, UiLifecycleManager, is_new_process_mode_request, reuse};
use crate::timer::TimeoutKind;

impl UiLifecycleManager {
    /// Starts (or re-foregrounds) the ability bound to `session_info`.
    ///
    /// Returns whether this was a cold start. A record already mid
    /// transition only gets its pending intent updated; no second remote
    /// dispatch happens.
    ///
    /// # Errors
    ///
    /// The session descriptor must carry a session token.
    pub fn start_ui_ability(
        self: &Arc<Self>,
        request: &mut AbilityRequest,
        mut session_info: SessionInfo,
        scene_flag: u32,
    ) -> LifecycleResult<bool> {
        if !session_info.has_session_token() {
            warn!("start rejected, session info is invalid");
            return Err(LifecycleError::InvalidSessionInfo);
        }
        let mut state = self.state();
        info!(
            persistent_id = session_info.persistent_id,
            bundle = %request.ability_info.bundle_name,
            ability = %request.ability_info.name,
            "start ui ability"
        );

        let existing = state
            .session_ability_map
            .get(&session_info.persistent_id)
            .cloned();
        let mut is_cold_start = false;
        let record = match existing {
            Some(record) => {
                info!(is_new_want = session_info.is_new_want, "session already tracked");
                record.set_is_new_want(session_info.is_new_want);
                if session_info.is_new_want {
                    // descriptors on the superseded want must not leak
                    record.close_session_want_fds();
                    record.set_want(request.want.clone());
                } else {
                    session_info.want.close_all_fds();
                }
                record
            },
            None => {
                let record = self.create_ability_record(&mut state, request, &session_info);
                is_cold_start = true;
                self.update_process_name(&mut state, &record, &session_info);
                record
            },
        };
        record.set_specify_token_id(request.specify_token_id);

        if record.pending_state() != PendingState::Initial {
            info!("transition in flight, foreground intent queued");
            record.set_pending_state(PendingState::Foreground);
            return Ok(is_cold_start);
        }
        record.set_pending_state(PendingState::Foreground);

        if is_cold_start {
            self.more_ability_numbers_send_event_info(&state, request);
            state
                .session_ability_map
                .insert(session_info.persistent_id, Arc::clone(&record));
            record.set_session_info(session_info.clone());
        }

        self.update_ability_record_launch_reason(request, &record);
        if let Some(callback) = &request.ability_info_callback {
            callback.notify_ability_token(record.token(), &request.want);
        }
        self.add_caller_record(request, &session_info, &record);
        self.process_foreground_locked(&mut state, &record, scene_flag);
        self.check_specified(&mut state, request, &record);
        self.send_key_event(request);
        Ok(is_cold_start)
    }

    /// The remote process attached its ability thread.
    ///
    /// # Errors
    ///
    /// The token must belong to a live tracked record; attachment refusals
    /// from the status-bar delegate close the session.
    pub fn attach_ability_thread(
        self: &Arc<Self>,
        scheduler: Arc<dyn AbilityScheduler>,
        token: Token,
    ) -> LifecycleResult<()> {
        let mut state = self.state();
        if !state.contains_token(token) {
            warn!(%token, "attach for untracked ability");
            return Err(LifecycleError::TokenNotFound(token.raw()));
        }
        let record = state
            .find_record_by_token(token)
            .ok_or(LifecycleError::TokenNotFound(token.raw()))?;
        info!(element = %record.ability_info().element(), "lifecycle: attach ability thread");
        self.set_last_exit_reason(&record);

        self.timers().cancel(TimeoutKind::Load, record.record_id());
        record.set_loading(false);
        record.set_scheduler(scheduler);

        if let Some(status_bar) = &self.services().status_bar {
            if !status_bar.on_process_attached(token) {
                warn!(%token, "process attachment refused, closing the session");
                self.terminate_session(&record);
                return Err(LifecycleError::ProcessAttachmentFailed);
            }
        }

        if record.is_started_by_call() {
            if record.want().bool_param(PARAM_CALL_TO_FOREGROUND, false) {
                record.set_start_to_foreground(true);
                self.post_foreground_timer(&record);
                self.services().app.move_to_foreground(token);
            } else {
                record.set_start_to_background(true);
                self.move_to_background_locked(&mut state, &record);
            }
            return Ok(());
        }
        if record.is_need_to_call_request() {
            record.call_request();
        }
        self.post_foreground_timer(&record);
        self.services().app.move_to_foreground(token);
        Ok(())
    }

    /// Process-manager report that the app side finished a request. Only
    /// the foreground report drives work: the record's foreground
    /// transaction is scheduled, unless the record is already closing.
    pub fn on_ability_request_done(
        self: &Arc<Self>,
        token: Token,
        app_state: abilityd_core::state::AppState,
    ) {
        if app_state != abilityd_core::state::AppState::Foreground {
            debug!(%token, ?app_state, "request done ignored");
            return;
        }
        let guard = self.state();
        let Some(record) = guard.find_record_by_token(token) else {
            warn!(%token, "request done for untracked ability");
            return;
        };
        if record.is_terminating() {
            info!(record_id = record.record_id(), "ability is terminating");
            self.timers().cancel(TimeoutKind::Foreground, record.record_id());
            return;
        }
        debug!(element = %record.ability_info().element(), "scheduling foreground transaction");
        self.schedule_foreground_transaction(&record);
    }

    /// Front door for framework-driven starts with no session yet: routes
    /// specified-mode and specified-process requests into their
    /// resolution protocols, everything else through reuse resolution and
    /// a compositor pending activation.
    ///
    /// # Errors
    ///
    /// Propagates pending-activation failures; specified-protocol
    /// enqueueing itself cannot fail.
    pub fn notify_scb_to_start_ui_ability(
        self: &Arc<Self>,
        mut request: AbilityRequest,
    ) -> LifecycleResult<()> {
        let mut state = self.state();

        // distributed starts may pin the persistent id directly
        let distributed_id = request.want.int_param(PARAM_DMS_PERSISTENT_ID, 0);
        if distributed_id != 0 && self.services().permissions.allow_distributed_persistent_id() {
            let persistent_id =
                i32::try_from(distributed_id).map_err(|_| LifecycleError::InvalidSessionInfo)?;
            debug!(persistent_id, "distributed start with pinned session");
            return self.start_with_persistent_id_by_distributed(
                &mut state,
                &request,
                persistent_id,
            );
        }

        let is_ui_ability = request.ability_info.is_ui_ability();
        if !is_new_process_mode_request(&request)
            && request.ability_info.isolation_process
            && is_ui_ability
        {
            info!("start specified process");
            let request_id = state.next_specified_request_id();
            state.specified_request_map.insert(request_id, request.clone());
            self.services().app.start_specified_process(
                &request.want,
                &request.ability_info,
                request_id,
            );
            return Ok(());
        }

        if request.ability_info.launch_mode == LaunchMode::Specified {
            self.pre_create_process_name(&mut state, &mut request);
            let request_id = state.next_specified_request_id();
            state.specified_request_map.insert(request_id, request.clone());
            self.services().app.start_specified_ability(
                &request.want,
                &request.ability_info,
                request_id,
            );
            return Ok(());
        }

        let mut session_info = Self::create_session_info(&request);
        session_info.request_code = request.request_code;
        let decision = reuse::resolve_persistent_id(&state, &request);
        session_info.persistent_id = decision.persistent_id_or_zero();
        session_info.reuse = decision.reuse;
        session_info.user_id = self.user_id();
        session_info.is_atomic_service =
            request.ability_info.bundle_type == BundleType::AtomicService;
        info!(
            persistent_id = session_info.persistent_id,
            user_id = session_info.user_id,
            "notify compositor to start"
        );
        let result = self.notify_scb_pending_activation(&mut state, &mut session_info, &request);
        session_info.want.close_all_fds();
        result
    }

    /// Pre-start variant used for atomic services: builds the session and
    /// requests activation without reuse resolution.
    ///
    /// # Errors
    ///
    /// Propagates pending-activation failures.
    pub fn notify_scb_to_pre_start_ui_ability(
        self: &Arc<Self>,
        request: &AbilityRequest,
    ) -> LifecycleResult<SessionInfo> {
        let mut state = self.state();
        let mut session_info = Self::create_session_info(request);
        session_info.request_code = request.request_code;
        session_info.is_atomic_service = true;
        self.notify_scb_pending_activation(&mut state, &mut session_info, request)?;
        Ok(session_info)
    }

    /// Compositor callback delivering the session for a call-created
    /// record parked in the temp map. Returns whether a cold start was
    /// performed.
    ///
    /// # Errors
    ///
    /// The descriptor must carry a session token.
    pub fn call_ui_ability_by_scb(
        self: &Arc<Self>,
        session_info: &SessionInfo,
    ) -> LifecycleResult<bool> {
        if !session_info.has_session_token() {
            return Err(LifecycleError::InvalidSessionInfo);
        }
        let mut state = self.state();
        debug!(ui_ability_id = session_info.ui_ability_id, "call ui ability by compositor");
        let Some(record) = state.tmp_ability_map.get(&session_info.ui_ability_id).cloned() else {
            warn!(ui_ability_id = session_info.ui_ability_id, "no parked ability");
            return Ok(false);
        };
        if state
            .session_ability_map
            .contains_key(&session_info.persistent_id)
        {
            warn!(persistent_id = session_info.persistent_id, "session already exists");
            return Ok(false);
        }

        let existing = self.count_instances(&state, session_info);
        if existing >= 1 {
            self.services().reporter.on_multi_instance_started(
                session_info.user_id,
                session_info.want.element(),
                existing + 1,
            );
        }
        state
            .session_ability_map
            .insert(session_info.persistent_id, Arc::clone(&record));
        state.tmp_ability_map.remove(&session_info.ui_ability_id);
        record.set_session_info(session_info.clone());
        self.load_ability_locked(&record);
        Ok(true)
    }

    fn count_instances(&self, state: &ManagerState, session_info: &SessionInfo) -> usize {
        let element = session_info.want.element();
        state
            .session_ability_map
            .values()
            .filter(|record| {
                let info = record.ability_info();
                info.bundle_name == element.bundle_name
                    && info.name == element.ability_name
                    && info.module_name == element.module_name
            })
            .count()
    }

    // ------------------------------------------------------------------
    // Session construction and compositor notification
    // ------------------------------------------------------------------

    pub(crate) fn create_session_info(request: &AbilityRequest) -> SessionInfo {
        debug!("create session info");
        SessionInfo {
            caller_token: request.caller_token,
            want: request.want.clone(),
            process_options: request.process_options.clone(),
            start_setting: request.start_setting.clone(),
            calling_token_id: u32::try_from(request.want.int_param(PARAM_CALLER_TOKEN, 0))
                .unwrap_or(0),
            ..SessionInfo::default()
        }
    }

    /// Routes a pending activation through the caller's session when the
    /// caller is tracked (and not mid-restart), else through the root
    /// scene session with a last-exit session-id lookup for non-standard
    /// launches.
    pub(crate) fn notify_scb_pending_activation(
        &self,
        state: &mut ManagerState,
        session_info: &mut SessionInfo,
        request: &AbilityRequest,
    ) -> LifecycleResult<()> {
        let caller = request
            .caller_token
            .and_then(|token| state.find_record_by_token(token))
            .filter(|caller| !caller.restart_app_flag());
        if let Some(caller) = caller {
            let caller_session = caller
                .session_info()
                .ok_or(LifecycleError::InvalidSessionInfo)?;
            let caller_token = caller_session
                .session_token
                .clone()
                .ok_or(LifecycleError::InvalidSessionInfo)?;
            self.check_caller_from_background(&caller, session_info);
            info!("pending activation via caller session");
            caller_token.session().pending_activation(session_info)?;
            return Ok(());
        }

        let root = state
            .root_scene_session
            .clone()
            .ok_or(LifecycleError::RootSessionUnavailable)?;
        if session_info.persistent_id == 0 {
            let info = &request.ability_info;
            let plain_standard = info.launch_mode == LaunchMode::Standard && !request.start_recent;
            if !plain_standard {
                if let Some(persistent_id) = self.services().exit_store.session_id(
                    info.access_token_id,
                    &info.module_name,
                    &info.name,
                ) {
                    info!(persistent_id, "restoring session id from last exit");
                    session_info.persistent_id = persistent_id;
                }
            }
        }
        session_info.can_start_ability_from_background = true;
        info!("pending activation via root scene session");
        root.session().pending_activation(session_info)?;
        Ok(())
    }

    /// Caller-session variant used by specified reuse and call paths.
    pub(crate) fn send_session_info_to_scb(
        &self,
        state: &mut ManagerState,
        caller: Option<&Arc<AbilityRecord>>,
        session_info: &mut SessionInfo,
    ) -> LifecycleResult<()> {
        if let Some(caller) = caller {
            if let Some(caller_session) = caller.session_info() {
                if let Some(caller_token) = caller_session.session_token.clone() {
                    self.check_caller_from_background(caller, session_info);
                    caller_token.session().pending_activation(session_info)?;
                    return Ok(());
                }
            }
        }
        let root = state
            .root_scene_session
            .clone()
            .ok_or(LifecycleError::RootSessionUnavailable)?;
        session_info.can_start_ability_from_background = true;
        root.session().pending_activation(session_info)?;
        Ok(())
    }

    fn check_caller_from_background(
        &self,
        caller: &Arc<AbilityRecord>,
        session_info: &mut SessionInfo,
    ) {
        let allowed = self
            .services()
            .permissions
            .allow_start_from_background(caller.ability_info().uid);
        session_info.can_start_ability_from_background = allowed;
        debug!(allowed, "caller-from-background check");
    }

    fn start_with_persistent_id_by_distributed(
        &self,
        state: &mut ManagerState,
        request: &AbilityRequest,
        persistent_id: PersistentId,
    ) -> LifecycleResult<()> {
        let mut session_info = Self::create_session_info(request);
        session_info.request_code = request.request_code;
        session_info.persistent_id = persistent_id;
        session_info.user_id = self.user_id();
        session_info.is_atomic_service =
            request.ability_info.bundle_type == BundleType::AtomicService;
        self.notify_scb_pending_activation(state, &mut session_info, request)
    }

    // ------------------------------------------------------------------
    // Record construction helpers
    // ------------------------------------------------------------------

    pub(crate) fn create_ability_record(
        &self,
        state: &mut ManagerState,
        request: &mut AbilityRequest,
        session_info: &SessionInfo,
    ) -> Arc<AbilityRecord> {
        debug!("create ability record");
        if let Some(setting) = session_info.start_setting.clone() {
            request.start_setting = Some(setting);
        }
        let record = Arc::new(AbilityRecord::new(
            state.next_record_id(),
            request,
            self.user_id(),
        ));
        self.set_reviver_info(request, &record, Some(session_info));
        record
    }

    /// Reads (and consumes) recovery info recorded at the application's
    /// previous exit.
    pub(crate) fn set_reviver_info(
        &self,
        request: &AbilityRequest,
        record: &Arc<AbilityRecord>,
        session_info: Option<&SessionInfo>,
    ) {
        let info = &request.ability_info;
        let plain_standard = info.launch_mode == LaunchMode::Standard && !request.start_recent;
        let key = exit_info_ability_key(
            info,
            session_info.map(|session| session.persistent_id),
            plain_standard,
        );
        let store = &self.services().exit_store;
        let has_recover_info = store.recover_info(info.access_token_id, &info.module_name, &key);
        record.update_recovery_info(has_recover_info);
        store.delete_recover_info(info.access_token_id, &info.module_name, &key);
    }

    /// Delivers the recorded last-exit reason to a (re)attaching ability.
    pub(crate) fn set_last_exit_reason(&self, record: &Arc<AbilityRecord>) {
        let info = record.ability_info();
        if info.bundle_name.is_empty() {
            warn!("record has no bundle name");
            return;
        }
        let Some(session_info) = record.session_info() else {
            warn!(record_id = record.record_id(), "record has no session info");
            return;
        };
        let standard = info.launch_mode == LaunchMode::Standard;
        let key = exit_info_ability_key(info, Some(session_info.persistent_id), standard);
        if let Some(reason) = self.services().exit_store.exit_reason(
            &info.bundle_name,
            info.access_token_id,
            &key,
        ) {
            debug!(ability = %key, cause = ?reason.cause, "delivering last exit reason");
            record.set_last_exit_reason(reason);
        }
    }

    pub(crate) fn update_ability_record_launch_reason(
        &self,
        request: &AbilityRequest,
        record: &Arc<AbilityRecord>,
    ) {
        if request.app_recovery || record.recovery_info() {
            record.set_launch_reason(LaunchReason::AppRecovery);
            return;
        }
        if request.want.flags() & FLAG_ABILITY_CONTINUATION != 0 {
            record.set_launch_reason(LaunchReason::Continuation);
            return;
        }
        record.set_launch_reason(LaunchReason::StartAbility);
    }

    /// Captures the caller binding, stripping distributed-routing
    /// parameters from the want so they never reach the started ability.
    pub(crate) fn add_caller_record(
        &self,
        request: &mut AbilityRequest,
        session_info: &SessionInfo,
        record: &Arc<AbilityRecord>,
    ) {
        let mut src_ability_id = String::new();
        if request.want.bool_param(PARAM_FOR_RESULT, false) {
            let src_device = request.want.string_param(PARAM_DMS_SRC_NETWORK_ID);
            let mission_id = request
                .want
                .int_param(PARAM_DMS_MISSION_ID, DEFAULT_DMS_MISSION_ID);
            debug!(%src_device, mission_id, "captured distributed routing source");
            request.want.remove_param(PARAM_DMS_SRC_NETWORK_ID);
            request.want.remove_param(PARAM_DMS_MISSION_ID);
            request.want.remove_param(PARAM_FOR_RESULT);
            src_ability_id = format!("{src_device}_{mission_id}");
        }
        record.add_caller_record(
            session_info.caller_token,
            session_info.request_code,
            src_ability_id,
            session_info.calling_token_id,
        );
    }

    fn more_ability_numbers_send_event_info(&self, state: &ManagerState, request: &AbilityRequest) {
        let info = &request.ability_info;
        let count = state
            .session_ability_map
            .values()
            .filter(|record| {
                let existing = record.ability_info();
                existing.bundle_name == info.bundle_name
                    && existing.name == info.name
                    && existing.module_name == info.module_name
            })
            .count();
        debug!(count, "existing instance count");
        if count >= 1 {
            self.services().reporter.on_multi_instance_started(
                request.user_id,
                &info.element(),
                count + 1,
            );
        }
    }

    fn send_key_event(&self, request: &AbilityRequest) {
        if !request.ability_info.visible {
            self.services()
                .reporter
                .on_invisible_ability_started(&request.ability_info.element());
        }
    }
}
