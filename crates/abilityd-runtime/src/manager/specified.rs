//! Specified-launch-mode protocol.
//!
//! SPECIFIED abilities multiplex logical instances behind a
//! runtime-resolved flag: the request is parked, the application side
//! resolves the flag asynchronously, and the response either reuses the
//! instance registered under the flag or starts a fresh one. The
//! `SpecifiedKey → record` map and the FIFO of keys awaiting their record
//! must stay consistent; entries are erased whenever their record
//! terminates, dies, or times out in foreground.

use std::sync::Arc;

use abilityd_core::record::AbilityRecord;
use abilityd_core::request::{AbilityRequest, BundleType, LaunchMode};
use abilityd_core::session::SessionInfo;
use abilityd_core::want::{PARAM_REQUEST_PROC_CODE, PARAM_REQUEST_TOKEN_CODE,
    PARAM_SPECIFIED_PROCESS_FLAG, Want, WantValue};
use abilityd_core::{LifecycleError, LifecycleResult};
use tracing::{debug, info, warn};

use super::{ManagerState, UiLifecycleManager, reuse};

/// Key identifying one specified-mode instance.
///
/// A plain hashable composite key; at most one record is registered per
/// key at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecifiedKey {
    /// Ability name.
    pub ability_name: String,
    /// Bundle name.
    pub bundle_name: String,
    /// Runtime-resolved flag.
    pub flag: String,
}

impl UiLifecycleManager {
    /// Tags a freshly created SPECIFIED record with the front queued key
    /// and registers it for reuse.
    pub(crate) fn check_specified(
        &self,
        state: &mut ManagerState,
        request: &AbilityRequest,
        record: &Arc<AbilityRecord>,
    ) {
        if request.ability_info.launch_mode != LaunchMode::Specified {
            return;
        }
        if let Some(key) = state.specified_info_queue.pop_front() {
            record.set_specified_flag(key.flag.clone());
            state.specified_ability_map.insert(key, Arc::clone(record));
        }
    }

    /// Response to the asynchronous flag resolution started by a
    /// SPECIFIED request: reuse by flag on a hit, start fresh otherwise.
    /// An empty flag always starts fresh.
    pub fn on_accept_want_response(self: &Arc<Self>, want: &Want, flag: &str, request_id: i32) {
        let mut state = self.state();
        let Some(mut request) = state.specified_request_map.remove(&request_id) else {
            warn!(request_id, "accept-want response for unknown request");
            return;
        };
        if request.ability_info.launch_mode != LaunchMode::Specified {
            return;
        }
        info!(element = %request.ability_info.element(), flag, "accept want response");
        let caller = request
            .caller_token
            .and_then(|token| state.find_record_by_token(token));

        if !flag.is_empty() {
            request.specified_flag = flag.to_string();
            let decision = reuse::resolve_specified(&state, &request);
            if decision.persistent_id.is_some() {
                let Some(record) = Self::get_reused_specified_ability(&state, want, flag) else {
                    return;
                };
                record.set_want(request.want.clone());
                record.set_is_new_want(true);
                self.update_ability_record_launch_reason(&request, &record);
                if let Err(err) =
                    self.move_ability_to_front(&mut state, &request, &record, caller.as_ref(), None)
                {
                    warn!(%err, "move reused specified ability to front");
                    return;
                }
                if let Some(callback) = &request.ability_info_callback {
                    debug!("notify restart specified ability");
                    callback.notify_restart_specified_ability(record.token());
                }
                return;
            }
        }
        self.notify_start_specified_ability(&mut request, want);
        if let Err(err) = self.start_ability_by_specified(&mut state, &request, caller.as_ref()) {
            warn!(%err, "start ability by specified");
        }
    }

    /// Flag resolution timed out; the pending request is dropped with no
    /// retry and no further callback to the starter.
    pub fn on_start_specified_ability_timeout_response(&self, request_id: i32) {
        info!(request_id, "start specified ability timed out");
        self.state().specified_request_map.remove(&request_id);
    }

    /// Response to specified-process resolution: the flag is stamped onto
    /// the parked request, which then continues either into the
    /// specified-ability protocol or a plain activation.
    pub fn on_start_specified_process_response(self: &Arc<Self>, flag: &str, request_id: i32) {
        let mut state = self.state();
        let Some(parked) = state.specified_request_map.get_mut(&request_id) else {
            return;
        };
        parked.want.set_param(
            PARAM_SPECIFIED_PROCESS_FLAG,
            WantValue::String(flag.to_string()),
        );
        info!(element = %parked.ability_info.element(), "specified process response");
        if parked.ability_info.launch_mode == LaunchMode::Specified {
            let want = parked.want.clone();
            let info = parked.ability_info.clone();
            self.services().app.start_specified_ability(&want, &info, request_id);
            return;
        }
        let Some(request) = state.specified_request_map.remove(&request_id) else {
            return;
        };
        let mut session_info = Self::create_session_info(&request);
        session_info.request_code = request.request_code;
        let decision = reuse::resolve_persistent_id(&state, &request);
        session_info.persistent_id = decision.persistent_id_or_zero();
        session_info.reuse = decision.reuse;
        session_info.user_id = request.user_id;
        session_info.is_atomic_service =
            request.ability_info.bundle_type == BundleType::AtomicService;
        if let Err(err) = self.notify_scb_pending_activation(&mut state, &mut session_info, &request)
        {
            warn!(%err, "pending activation after specified process response");
        }
    }

    /// Process-flag resolution timed out; the pending request is dropped.
    pub fn on_start_specified_process_timeout_response(&self, request_id: i32) {
        info!(request_id, "start specified process timed out");
        self.state().specified_request_map.remove(&request_id);
    }

    /// Compositor-driven specified start from a bare want.
    pub fn start_specified_ability_by_scb(self: &Arc<Self>, want: &Want) {
        let Some(resolver) = self.services().resolver.clone() else {
            warn!("no request resolver registered");
            return;
        };
        let Some(request) = resolver.generate_ability_request(want, self.user_id()) else {
            warn!(element = %want.element(), "cannot generate ability request");
            return;
        };
        let request_id = {
            let mut state = self.state();
            let request_id = state.next_specified_request_id();
            state.specified_request_map.insert(request_id, request.clone());
            request_id
        };
        self.services().app.start_specified_ability(
            &request.want,
            &request.ability_info,
            request_id,
        );
    }

    fn get_reused_specified_ability(
        state: &ManagerState,
        want: &Want,
        flag: &str,
    ) -> Option<Arc<AbilityRecord>> {
        let element = want.element();
        state
            .specified_ability_map
            .iter()
            .find(|(key, _)| {
                key.flag == flag
                    && key.ability_name == element.ability_name
                    && key.bundle_name == element.bundle_name
            })
            .map(|(_, record)| Arc::clone(record))
    }

    /// Re-activates an existing record at the front of the stack with a
    /// fresh want.
    pub(crate) fn move_ability_to_front(
        &self,
        state: &mut ManagerState,
        request: &AbilityRequest,
        record: &Arc<AbilityRecord>,
        caller: Option<&Arc<AbilityRecord>>,
        window_mode: Option<i32>,
    ) -> LifecycleResult<()> {
        let mut session_info = record
            .session_info()
            .ok_or(LifecycleError::InvalidSessionInfo)?;
        session_info.want = request.want.clone();
        session_info.process_options = None;
        self.send_session_info_to_scb(state, caller, &mut session_info)?;
        record.remove_window_mode();
        if let Some(mode) = window_mode {
            record.set_window_mode(mode);
        }
        Ok(())
    }

    /// Builds a fresh session for a specified start and parks the key to
    /// be matched against the record once the compositor creates it.
    pub(crate) fn start_ability_by_specified(
        &self,
        state: &mut ManagerState,
        request: &AbilityRequest,
        caller: Option<&Arc<AbilityRecord>>,
    ) -> LifecycleResult<()> {
        debug!("start ability by specified");
        let mut session_info = SessionInfo {
            caller_token: request.caller_token,
            want: request.want.clone(),
            request_code: request.request_code,
            process_options: request.process_options.clone(),
            ..SessionInfo::default()
        };
        state.specified_info_queue.push_back(SpecifiedKey {
            ability_name: request.ability_info.name.clone(),
            bundle_name: request.ability_info.bundle_name.clone(),
            flag: request.specified_flag.clone(),
        });
        self.send_session_info_to_scb(state, caller, &mut session_info)
    }

    fn notify_start_specified_ability(&self, request: &mut AbilityRequest, want: &Want) {
        let Some(callback) = request.ability_info_callback.clone() else {
            return;
        };
        let codes =
            callback.notify_start_specified_ability(request.caller_token, want, request.request_code);
        if let Some(codes) = codes {
            if codes.proc_code != 0 {
                request
                    .want
                    .set_param(PARAM_REQUEST_PROC_CODE, WantValue::Int(codes.proc_code));
            }
            if codes.token_code != 0 {
                request
                    .want
                    .set_param(PARAM_REQUEST_TOKEN_CODE, WantValue::Int(codes.token_code));
            }
        }
    }
}
