//! Call-based binding.
//!
//! A caller obtains a remote callable handle to the target ability. If
//! the target is already attached, the callee object is delivered (or
//! requested from the scheduler) immediately; otherwise the record is
//! parked in the temp map and delivery happens once its lifecycle reaches
//! a ready state and the remote side reports the callee through
//! [`UiLifecycleManager::call_request_done`].

use std::sync::Arc;

use abilityd_core::call::{CallConnection, Callee, ResolveOutcome};
use abilityd_core::record::AbilityRecord;
use abilityd_core::request::{AbilityRequest, BundleType};
use abilityd_core::session::CallToState;
use abilityd_core::state::{LaunchReason, PendingState};
use abilityd_core::want::{ElementName, PARAM_CALL_TO_FOREGROUND};
use abilityd_core::{LifecycleError, LifecycleResult};
use tracing::{debug, info, warn};

use super::{UiLifecycleManager, reuse};

impl UiLifecycleManager {
    /// Entry point for call bindings.
    ///
    /// # Errors
    ///
    /// Rejects non-call requests and requests without a connection with
    /// [`LifecycleError::ResolveCallFailed`].
    pub fn resolve_locked(self: &Arc<Self>, request: &mut AbilityRequest) -> LifecycleResult<()> {
        info!(element = %request.want.element(), "resolve call");
        if !request.is_call_request() {
            warn!("request is not a call request");
            return Err(LifecycleError::ResolveCallFailed);
        }
        self.call_ability_locked(request)
    }

    pub(crate) fn call_ability_locked(
        self: &Arc<Self>,
        request: &mut AbilityRequest,
    ) -> LifecycleResult<()> {
        let mut state = self.state();
        let decision = reuse::resolve_persistent_id(&state, request);
        let record = match decision.persistent_id {
            Some(persistent_id) => state
                .session_ability_map
                .get(&persistent_id)
                .cloned()
                .ok_or(LifecycleError::SessionNotFound(persistent_id))?,
            None => {
                let record = Arc::new(AbilityRecord::new(
                    state.next_record_id(),
                    request,
                    self.user_id(),
                ));
                self.set_reviver_info(request, &record, None);
                record
            },
        };
        record.add_caller_record(request.caller_token, request.request_code, String::new(), 0);
        record.set_launch_reason(LaunchReason::Call);
        if let Some(callback) = &request.ability_info_callback {
            callback.notify_ability_token(record.token(), &request.want);
        }

        let connection = request
            .connection
            .clone()
            .ok_or(LifecycleError::ResolveCallFailed)?;
        let call_to_foreground = request.want.bool_param(PARAM_CALL_TO_FOREGROUND, false);
        match Self::resolve_ability(&record, &connection) {
            ResolveOutcome::HasRemoteObject => {
                debug!("target ability already resolved");
                if !call_to_foreground {
                    return Ok(());
                }
                debug!("resolved target also moves to foreground");
                let mut session_info = Self::create_session_info(request);
                session_info.persistent_id = decision.persistent_id_or_zero();
                session_info.state = CallToState::Foreground;
                session_info.reuse = decision.reuse;
                session_info.ui_ability_id = record.record_id();
                session_info.is_atomic_service =
                    request.ability_info.bundle_type == BundleType::AtomicService;
                if record.pending_state() != PendingState::Initial {
                    info!("transition in flight, foreground intent queued");
                    record.set_pending_state(PendingState::Foreground);
                    return self.notify_scb_pending_activation(
                        &mut state,
                        &mut session_info,
                        request,
                    );
                }
                self.process_foreground_locked(&mut state, &record, 0);
                self.notify_scb_pending_activation(&mut state, &mut session_info, request)
            },
            ResolveOutcome::NoRemoteObject => {
                let mut session_info = Self::create_session_info(request);
                session_info.persistent_id = decision.persistent_id_or_zero();
                session_info.reuse = decision.reuse;
                session_info.ui_ability_id = record.record_id();
                session_info.is_atomic_service =
                    request.ability_info.bundle_type == BundleType::AtomicService;
                session_info.state = if call_to_foreground {
                    CallToState::Foreground
                } else {
                    CallToState::Background
                };
                debug!(ui_ability_id = session_info.ui_ability_id, "parking call-created record");
                state
                    .tmp_ability_map
                    .insert(record.record_id(), Arc::clone(&record));
                self.notify_scb_pending_activation(&mut state, &mut session_info, request)
            },
        }
    }

    /// Delivery rules for a call binding against the target's state.
    fn resolve_ability(
        record: &Arc<AbilityRecord>,
        connection: &Arc<dyn CallConnection>,
    ) -> ResolveOutcome {
        if record.resolve_connection(connection) {
            debug!("callee already available, delivered directly");
            return ResolveOutcome::HasRemoteObject;
        }
        if record.is_ready() {
            debug!("target ready, issuing call request");
            record.call_request();
            return ResolveOutcome::HasRemoteObject;
        }
        debug!("call request deferred until lifecycle completes");
        ResolveOutcome::NoRemoteObject
    }

    /// The remote ability produced its callee object.
    pub fn call_request_done(&self, record: &Arc<AbilityRecord>, callee: Arc<dyn Callee>) {
        let _guard = self.state();
        record.on_call_request_done(callee);
    }

    /// Releases one call binding.
    ///
    /// # Errors
    ///
    /// Fails when no tracked record of `element` holds `connection`.
    pub fn release_call_locked(
        &self,
        connection: &Arc<dyn CallConnection>,
        element: &ElementName,
    ) -> LifecycleResult<()> {
        debug!(%element, "release call");
        let state = self.state();
        let records = state.records_by_name(element);
        let record = records
            .iter()
            .find(|record| record.is_exist_connection(connection))
            .ok_or(LifecycleError::ReleaseCallFailed)?;
        if !record.release_call(connection) {
            return Err(LifecycleError::ReleaseCallFailed);
        }
        Ok(())
    }

    /// Same release, driven by the connection's remote party dying.
    pub fn on_call_connect_died(&self, connection: &Arc<dyn CallConnection>, element: &ElementName) {
        info!(%element, "call connection died");
        let state = self.state();
        let records = state.records_by_name(element);
        let Some(record) = records
            .iter()
            .find(|record| record.is_exist_connection(connection))
        else {
            warn!(%element, "no record holds the dead connection");
            return;
        };
        record.release_call(connection);
    }
}
