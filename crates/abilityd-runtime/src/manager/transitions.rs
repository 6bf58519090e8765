//! Lifecycle transition dispatch and completion.
//!
//! Remote transaction reports enter through
//! [`UiLifecycleManager::ability_transaction_done`] and are checked against
//! the record's exact current state; an out-of-order report is rejected,
//! never applied. Completion work is submitted to the runtime and
//! re-acquires the manager lock on its own, which keeps remote round trips
//! off the lock.

use std::sync::Arc;

use abilityd_core::record::{AbilityRecord, SavedStateData, Token};
use abilityd_core::session::SessionInfo;
use abilityd_core::state::{AbilityState, AbilityVisibilityState, PendingState, TransactionState};
use abilityd_core::want::Want;
use abilityd_core::{LifecycleError, LifecycleResult};
use tracing::{debug, error, info, warn};

use super::recovery::SessionExceptionCode;
use super::{ManagerState, UiLifecycleManager};
use crate::timer::TimeoutKind;

impl UiLifecycleManager {
    /// Remote report that a scheduled lifecycle transaction finished.
    ///
    /// Background reports may carry saved ability state.
    ///
    /// # Errors
    ///
    /// Rejects unknown tokens and reports that do not match the record's
    /// in-flight transition.
    pub fn ability_transaction_done(
        self: &Arc<Self>,
        token: Token,
        transaction: TransactionState,
        save_data: Option<SavedStateData>,
    ) -> LifecycleResult<()> {
        let state = self.state();
        let record = state
            .find_record_by_token(token)
            .ok_or(LifecycleError::TokenNotFound(token.raw()))?;
        debug!(
            record_id = record.record_id(),
            element = %record.ability_info().element(),
            ?transaction,
            "ability transaction done"
        );
        if matches!(
            transaction,
            TransactionState::Background | TransactionState::BackgroundFailed
        ) {
            if let Some(data) = save_data {
                record.save_ability_state(data);
            }
        }
        drop(state);
        match transaction {
            TransactionState::Initial => self.dispatch_terminate(&record),
            TransactionState::Background | TransactionState::BackgroundFailed => {
                self.dispatch_background(&record)
            },
            TransactionState::Foreground => self.dispatch_foreground(&record, true, None),
            TransactionState::ForegroundFailed
            | TransactionState::ForegroundInvalidMode
            | TransactionState::ForegroundWindowFrozen => {
                self.dispatch_foreground(&record, false, Some(transaction))
            },
        }
    }

    pub(crate) fn dispatch_foreground(
        self: &Arc<Self>,
        record: &Arc<AbilityRecord>,
        success: bool,
        failure: Option<TransactionState>,
    ) -> LifecycleResult<()> {
        if !record.is_ability_state(AbilityState::Foregrounding) {
            error!(
                record_id = record.record_id(),
                actual = %record.ability_state(),
                "foreground report while not foregrounding"
            );
            return Err(LifecycleError::InvalidTransition {
                expected: AbilityState::Foregrounding,
                actual: record.ability_state(),
            });
        }
        self.timers().cancel(TimeoutKind::Foreground, record.record_id());
        let manager = Arc::clone(self);
        let record = Arc::clone(record);
        if success {
            debug!(record_id = record.record_id(), "foreground succeeded");
            tokio::spawn(async move {
                manager.complete_foreground_success(&record);
            });
        } else {
            tokio::spawn(async move {
                if failure == Some(TransactionState::ForegroundWindowFrozen) {
                    info!(record_id = record.record_id(), "window was frozen");
                    record.set_ability_state(AbilityState::Background);
                    manager.services().app.move_to_background(record.token());
                    return;
                }
                manager.handle_foreground_failed(&record);
            });
        }
        Ok(())
    }

    pub(crate) fn dispatch_background(
        self: &Arc<Self>,
        record: &Arc<AbilityRecord>,
    ) -> LifecycleResult<()> {
        if !record.is_ability_state(AbilityState::Backgrounding) {
            error!(
                record_id = record.record_id(),
                actual = %record.ability_state(),
                "background report while not backgrounding"
            );
            return Err(LifecycleError::InvalidTransition {
                expected: AbilityState::Backgrounding,
                actual: record.ability_state(),
            });
        }
        self.timers().cancel(TimeoutKind::Background, record.record_id());
        let manager = Arc::clone(self);
        let record = Arc::clone(record);
        tokio::spawn(async move {
            manager.complete_background(&record);
        });
        Ok(())
    }

    pub(crate) fn dispatch_terminate(
        self: &Arc<Self>,
        record: &Arc<AbilityRecord>,
    ) -> LifecycleResult<()> {
        if !record.is_ability_state(AbilityState::Terminating) {
            error!(
                record_id = record.record_id(),
                actual = %record.ability_state(),
                "terminate report while not terminating"
            );
            return Err(LifecycleError::NotTerminating {
                actual: record.ability_state(),
            });
        }
        self.timers().cancel(TimeoutKind::Terminate, record.record_id());
        let manager = Arc::clone(self);
        let record = Arc::clone(record);
        tokio::spawn(async move {
            manager.complete_terminate(&record);
        });
        Ok(())
    }

    /// Completion half of a successful foreground transaction.
    pub(crate) fn complete_foreground_success(self: &Arc<Self>, record: &Arc<AbilityRecord>) {
        let mut state = self.state();
        record.remove_window_mode();
        debug!(element = %record.ability_info().element(), "complete foreground");
        record.set_ability_state(AbilityState::Foreground);
        if matches!(
            record.visibility_state(),
            AbilityVisibilityState::Unspecified | AbilityVisibilityState::Initial
        ) {
            record.set_visibility_state(AbilityVisibilityState::ForegroundShow);
        }

        // deferred call-request delivery for call-driven starts
        if record.is_started_by_call() && record.is_start_to_foreground() && record.is_ready() {
            debug!("call request after completing foreground");
            record.call_request();
            record.set_start_to_foreground(false);
        }

        match record.pending_state() {
            PendingState::Background => {
                record.set_minimize_reason(true);
                self.move_to_background_locked(&mut state, record);
            },
            PendingState::Foreground => {
                record.set_pending_state(PendingState::Initial);
            },
            PendingState::Initial => {},
        }

        let handler = state.session_handler.clone();
        if let (Some(handler), Some(session_info)) = (handler, record.session_info()) {
            handler.on_session_moved_to_front(session_info.persistent_id);
        }
    }

    /// Completion half of a failed foreground transaction: report the
    /// exception and close the ability.
    pub(crate) fn handle_foreground_failed(self: &Arc<Self>, record: &Arc<AbilityRecord>) {
        let mut state = self.state();
        if !record.is_ability_state(AbilityState::Foregrounding) {
            warn!(record_id = record.record_id(), "foreground failure for settled record");
            return;
        }
        self.notify_scb_exception(
            &mut state,
            record,
            SessionExceptionCode::ForegroundTimeout,
            "handleForegroundFailed",
        );
        if let Err(err) = self.close_ui_ability_inner(&mut state, record, 0, None, false) {
            warn!(record_id = record.record_id(), %err, "close after foreground failure");
        }
    }

    /// Completion half of a background transaction.
    ///
    /// Also sweeps the terminate list: records superseded while this
    /// backgrounding was in flight are now terminated in a batch.
    pub(crate) fn complete_background(self: &Arc<Self>, record: &Arc<AbilityRecord>) {
        let mut state = self.state();
        if !record.is_ability_state(AbilityState::Backgrounding) {
            warn!(
                record_id = record.record_id(),
                actual = %record.ability_state(),
                "cannot complete background"
            );
            return;
        }
        record.set_ability_state(AbilityState::Background);
        self.services().app.move_to_background(record.token());

        match record.pending_state() {
            PendingState::Foreground => {
                self.post_foreground_timer(record);
                self.services().app.move_to_foreground(record.token());
            },
            PendingState::Background => {
                record.set_pending_state(PendingState::Initial);
            },
            PendingState::Initial => {},
        }

        if record.is_started_by_call() && record.is_start_to_background() && record.is_ready() {
            debug!("call request after completing background");
            record.call_request();
            record.set_start_to_background(false);
        }

        let backgrounded: Vec<Arc<AbilityRecord>> = state
            .terminate_ability_list
            .iter()
            .filter(|waiting| waiting.is_ability_state(AbilityState::Background))
            .cloned()
            .collect();
        for waiting in backgrounded {
            self.terminate_ability_locked(&waiting);
        }
    }

    /// Completion half of a terminate: final local cleanup. Runs either on
    /// remote confirmation or from the terminate watchdog.
    pub(crate) fn complete_terminate(self: &Arc<Self>, record: &Arc<AbilityRecord>) {
        let mut state = self.state();
        if !record.is_ability_state(AbilityState::Terminating) {
            warn!(record_id = record.record_id(), "record is not terminating");
            return;
        }
        if let Err(err) = self.services().app.terminate_ability(record.token()) {
            // local cleanup proceeds regardless
            error!(record_id = record.record_id(), %err, "process manager failed to terminate");
        }
        state.erase_specified_ability_record(record);
        state
            .terminate_ability_list
            .retain(|existing| !Arc::ptr_eq(existing, record));
        info!(record_id = record.record_id(), "terminate complete");
    }

    // ------------------------------------------------------------------
    // Foreground/background driving
    // ------------------------------------------------------------------

    pub(crate) fn post_foreground_timer(self: &Arc<Self>, record: &Arc<AbilityRecord>) {
        let manager = Arc::clone(self);
        let record_id = record.record_id();
        self.timers().post(
            TimeoutKind::Foreground,
            record_id,
            self.config().foreground_timeout,
            move || {
                manager.on_time_out(TimeoutKind::Foreground, record_id, false);
            },
        );
    }

    /// Sends the foreground transaction to the attached ability thread.
    pub(crate) fn schedule_foreground_transaction(&self, record: &Arc<AbilityRecord>) {
        record.set_ability_state(AbilityState::Foregrounding);
        if let Some(scheduler) = record.scheduler() {
            scheduler.schedule_foreground(&record.want(), record.scene_flag());
        } else {
            warn!(record_id = record.record_id(), "no scheduler to foreground");
        }
    }

    /// Drives a record toward foreground: attached records get the
    /// transaction scheduled under a watchdog, cold records get their
    /// process loaded first.
    pub(crate) fn process_foreground_locked(
        self: &Arc<Self>,
        _state: &mut ManagerState,
        record: &Arc<AbilityRecord>,
        scene_flag: u32,
    ) {
        record.set_scene_flag(scene_flag);
        if record.is_ready() {
            self.post_foreground_timer(record);
            self.services().app.move_to_foreground(record.token());
        } else {
            self.load_ability_locked(record);
        }
    }

    /// Asks the process manager to load the hosting process, under a load
    /// watchdog.
    pub(crate) fn load_ability_locked(self: &Arc<Self>, record: &Arc<AbilityRecord>) {
        record.set_loading(true);
        let manager = Arc::clone(self);
        let record_id = record.record_id();
        self.timers().post(
            TimeoutKind::Load,
            record_id,
            self.config().app_start_timeout,
            move || {
                manager.on_time_out(TimeoutKind::Load, record_id, false);
            },
        );
        self.services().app.load_ability(
            record.token(),
            record.ability_info(),
            &record.want(),
            &record.process_name(),
        );
    }

    /// Starts a background transition under a watchdog.
    pub(crate) fn move_to_background_locked(
        self: &Arc<Self>,
        _state: &mut ManagerState,
        record: &Arc<AbilityRecord>,
    ) {
        record.set_is_new_want(false);
        record.set_ability_state(AbilityState::Backgrounding);
        let manager = Arc::clone(self);
        let watched = Arc::clone(record);
        self.timers().post(
            TimeoutKind::Background,
            record.record_id(),
            self.config().background_timeout,
            move || {
                error!(record_id = watched.record_id(), "move to background timeout");
                manager.complete_background(&watched);
            },
        );
        if let Some(scheduler) = record.scheduler() {
            scheduler.schedule_background(&record.want());
        }
    }

    /// Starts the remote terminate transaction and arms the unconditional
    /// terminate watchdog: a hung remote must not block local cleanup.
    pub(crate) fn terminate_ability_locked(self: &Arc<Self>, record: &Arc<AbilityRecord>) {
        record.set_ability_state(AbilityState::Terminating);
        let manager = Arc::clone(self);
        let watched = Arc::clone(record);
        self.timers().post(
            TimeoutKind::Terminate,
            record.record_id(),
            self.config().terminate_timeout(),
            move || {
                warn!(record_id = watched.record_id(), "terminate timeout, forcing completion");
                manager.complete_terminate(&watched);
            },
        );
        if let Some(scheduler) = record.scheduler() {
            scheduler.schedule_terminate(&record.want());
        }
    }

    // ------------------------------------------------------------------
    // Minimize / close
    // ------------------------------------------------------------------

    /// Minimizes a foreground ability.
    ///
    /// A record mid-transition only gets its pending intent updated; a
    /// record in any state other than foreground is left untouched. Both
    /// are successes.
    ///
    /// # Errors
    ///
    /// Never fails on state; reserved for future argument validation.
    pub fn minimize_ui_ability(
        self: &Arc<Self>,
        record: &Arc<AbilityRecord>,
        from_user: bool,
        scene_flag: u32,
    ) -> LifecycleResult<()> {
        let mut state = self.state();
        info!(element = %record.ability_info().element(), from_user, "minimize ui ability");
        record.set_minimize_reason(from_user);
        record.set_scene_flag(scene_flag);
        if record.pending_state() != PendingState::Initial {
            info!("transition already in flight, queueing background intent");
            record.set_pending_state(PendingState::Background);
            return Ok(());
        }
        if !record.is_ability_state(AbilityState::Foreground) {
            warn!(actual = %record.ability_state(), "minimize ignored, not foreground");
            return Ok(());
        }
        record.set_pending_state(PendingState::Background);
        self.move_to_background_locked(&mut state, record);
        record.set_scene_flag(0);
        Ok(())
    }

    /// Closes an ability, delivering results to its callers.
    ///
    /// Returns once the close is accepted; the lifecycle outcome is
    /// observable through the map queries.
    ///
    /// # Errors
    ///
    /// Fails only on argument validation; a record already terminating is
    /// an accepted no-op.
    pub fn close_ui_ability(
        self: &Arc<Self>,
        record: &Arc<AbilityRecord>,
        result_code: i32,
        result_want: Option<&Want>,
        is_clear_session: bool,
    ) -> LifecycleResult<()> {
        let mut state = self.state();
        self.close_ui_ability_inner(&mut state, record, result_code, result_want, is_clear_session)
    }

    pub(crate) fn close_ui_ability_inner(
        self: &Arc<Self>,
        state: &mut ManagerState,
        record: &Arc<AbilityRecord>,
        result_code: i32,
        result_want: Option<&Want>,
        is_clear_session: bool,
    ) -> LifecycleResult<()> {
        info!(element = %record.ability_info().element(), "close ui ability");
        if record.is_terminating() && !record.is_foreground() {
            info!("ability is already terminating");
            return Ok(());
        }
        self.services()
            .app
            .prepare_terminate(record.token(), is_clear_session);
        record.set_terminating_flag();
        record.set_clear_session_flag(is_clear_session);
        match result_want {
            Some(want) => record.save_result_to_callers(result_code, want),
            None => record.save_result_to_callers(-1, &Want::default()),
        }
        state.erase_ability_record(record);

        if record.is_ability_state(AbilityState::Initial) {
            // never attached: nothing to background or terminate remotely
            if record.scheduler().is_none() {
                self.timers().cancel(TimeoutKind::Load, record.record_id());
            }
            record.set_ability_state(AbilityState::Terminating);
            if let Err(err) = self.services().app.terminate_ability(record.token()) {
                error!(record_id = record.record_id(), %err, "terminate before attach");
            }
            return Ok(());
        }

        state.terminate_ability_list.push(Arc::clone(record));
        self.send_result_to_callers(state, record);

        if record.is_foreground() {
            debug!("close of an active ability, backgrounding first");
            record.set_pending_state(PendingState::Background);
            self.move_to_background_locked(state, record);
            return Ok(());
        }

        if record.is_ability_state(AbilityState::Background) {
            self.terminate_ability_locked(record);
        }
        Ok(())
    }

    /// User-requested cleanup: asks the process manager first and falls
    /// back to a session-clearing close.
    ///
    /// # Errors
    ///
    /// Propagates close validation failures.
    pub fn clean_ui_ability(self: &Arc<Self>, record: &Arc<AbilityRecord>) -> LifecycleResult<()> {
        let mut state = self.state();
        let element = record.ability_info().element();
        if self.services().app.clean_ability_by_user_request(record.token()) {
            info!(%element, "process manager cleaned ability on user request");
            return Ok(());
        }
        info!(%element, "cannot force kill, scheduling lifecycle close");
        self.close_ui_ability_inner(&mut state, record, -1, None, true)
    }

    pub(crate) fn send_result_to_callers(
        &self,
        state: &ManagerState,
        record: &Arc<AbilityRecord>,
    ) {
        for (caller_token, request_code, result_code, want) in record.take_caller_results() {
            let Some(caller_token) = caller_token else {
                continue;
            };
            let Some(caller) = state.find_record_by_token(caller_token) else {
                warn!(%caller_token, "result caller is no longer tracked");
                continue;
            };
            match caller.scheduler() {
                Some(scheduler) => scheduler.send_result(request_code, result_code, &want),
                None => warn!(%caller_token, "result caller has no scheduler"),
            }
        }
    }

    /// Returns to the caller of `record`, delivering its result through a
    /// back-transition activation on the current session.
    ///
    /// # Errors
    ///
    /// Both the current and the caller's session infos must carry session
    /// tokens.
    pub fn back_to_caller_ability_with_result(
        &self,
        current_session_info: &SessionInfo,
        record: &Arc<AbilityRecord>,
    ) -> LifecycleResult<()> {
        let current_token = current_session_info
            .session_token
            .clone()
            .ok_or(LifecycleError::InvalidSessionInfo)?;
        let caller_session_info = record.session_info().ok_or(LifecycleError::InvalidSessionInfo)?;
        if !caller_session_info.has_session_token() {
            return Err(LifecycleError::InvalidSessionInfo);
        }
        // the flag lives only on this one activation's payload
        let mut info = caller_session_info;
        info.is_back_transition = true;
        current_token.session().pending_activation(&info)?;
        Ok(())
    }
}
