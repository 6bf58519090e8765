//! Failure, timeout, and death recovery.
//!
//! Timeouts are a background recovery concern, never a synchronous
//! failure mode: the original caller already got its answer when the
//! request was accepted. Exception notifications to the compositor are
//! best-effort; with no session (or no token) left to notify, they are
//! skipped silently.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use abilityd_core::record::AbilityRecord;
use abilityd_core::state::AbilityState;
use tracing::{debug, error, info, warn};

use super::{ManagerState, UiLifecycleManager};
use crate::timer::TimeoutKind;

/// Error codes carried by a session exception notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExceptionCode {
    /// The process failed to attach within budget.
    LoadTimeout,
    /// The foreground transaction failed or timed out.
    ForegroundTimeout,
    /// The remote process died.
    Died,
}

impl SessionExceptionCode {
    /// Wire value placed into the session descriptor.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::LoadTimeout => 1,
            Self::ForegroundTimeout => 2,
            Self::Died => 3,
        }
    }
}

impl UiLifecycleManager {
    /// Watchdog/event-handler entry: a supervised transaction exceeded its
    /// budget. `is_half` marks the halfway warning, which only logs.
    pub fn on_time_out(self: &Arc<Self>, kind: TimeoutKind, record_id: i64, is_half: bool) {
        let mut state = self.state();
        let Some(record) = state.find_record_by_id(record_id) else {
            warn!(record_id, %kind, "timeout for untracked record");
            return;
        };
        warn!(
            record_id,
            %kind,
            is_half,
            element = %record.ability_info().element(),
            process = %record.process_name(),
            "lifecycle timeout"
        );
        if is_half {
            return;
        }
        match kind {
            TimeoutKind::Load => {
                record.set_loading(false);
                self.handle_load_timeout(&mut state, &record);
            },
            TimeoutKind::Foreground => {
                self.handle_foreground_timeout(&mut state, &record);
            },
            TimeoutKind::Background | TimeoutKind::Terminate => {},
        }
    }

    fn handle_load_timeout(
        self: &Arc<Self>,
        state: &mut ManagerState,
        record: &Arc<AbilityRecord>,
    ) {
        debug!(record_id = record.record_id(), "handle load timeout");
        self.notify_scb_exception(
            state,
            record,
            SessionExceptionCode::LoadTimeout,
            "handleLoadTimeout",
        );
        self.services().app.attach_timeout(record.token());
    }

    fn handle_foreground_timeout(
        self: &Arc<Self>,
        state: &mut ManagerState,
        record: &Arc<AbilityRecord>,
    ) {
        if !record.is_ability_state(AbilityState::Foregrounding) {
            debug!(record_id = record.record_id(), "foreground timeout for settled record");
            return;
        }
        self.notify_scb_exception(
            state,
            record,
            SessionExceptionCode::ForegroundTimeout,
            "handleForegroundTimeout",
        );
        self.services().app.attach_timeout(record.token());
        state.erase_specified_ability_record(record);
    }

    /// Best-effort exception report to the compositor, followed by removal
    /// from the authoritative map.
    pub(crate) fn notify_scb_exception(
        &self,
        state: &mut ManagerState,
        record: &Arc<AbilityRecord>,
        code: SessionExceptionCode,
        reason: &str,
    ) {
        if let Some(session_info) = record.session_info() {
            if let Some(token) = session_info.session_token.clone() {
                info!(record_id = record.record_id(), reason, "notify session exception");
                let payload = session_info.with_exception(code.code(), reason);
                if let Err(err) = token.session().notify_exception(&payload) {
                    warn!(record_id = record.record_id(), %err, "exception notify failed");
                }
            }
        }
        state.erase_ability_record(record);
    }

    /// The remote process crashed: force the record into termination and
    /// clean up without waiting for any confirmation round trip.
    pub fn on_ability_died(self: &Arc<Self>, record: &Arc<AbilityRecord>) {
        let mut state = self.state();
        info!(
            record_id = record.record_id(),
            element = %record.ability_info().element(),
            "ability died"
        );
        match record.ability_state() {
            AbilityState::Initial => {
                self.timers().cancel(TimeoutKind::Load, record.record_id());
                record.set_loading(false);
            },
            AbilityState::Foregrounding => {
                self.timers().cancel(TimeoutKind::Foreground, record.record_id());
            },
            AbilityState::Backgrounding => {
                self.timers().cancel(TimeoutKind::Background, record.record_id());
            },
            _ => {},
        }
        state.terminate_ability_list.push(Arc::clone(record));
        record.set_terminating_flag();
        record.set_ability_state(AbilityState::Terminating);
        self.notify_scb_exception(&mut state, record, SessionExceptionCode::Died, "onAbilityDied");
        self.services().app.attach_timeout(record.token());
        // the remote party is gone: drive terminate completion directly
        if let Err(err) = self.dispatch_terminate(record) {
            error!(record_id = record.record_id(), %err, "dispatch terminate after death");
        }
        state.erase_specified_ability_record(record);
    }

    /// Bounded synchronous query asking the ability whether it objects to
    /// termination.
    ///
    /// This is the component's only blocking wait. The query runs on a
    /// worker thread; if the bound elapses, termination proceeds as if the
    /// ability had not objected. Must not be called with the manager lock
    /// held.
    #[must_use]
    pub fn prepare_terminate_ability(&self, record: &Arc<AbilityRecord>) -> bool {
        info!(element = %record.ability_info().element(), "prepare terminate");
        if !self.check_prepare_terminate_enable(record) {
            debug!("prepare terminate not supported for this record");
            return false;
        }
        let Some(scheduler) = record.scheduler() else {
            return false;
        };
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(scheduler.prepare_terminate());
        });
        match receiver.recv_timeout(self.config().prepare_terminate_timeout()) {
            Ok(blocked) => blocked,
            Err(_) => {
                error!(record_id = record.record_id(), "prepare terminate timed out");
                false
            },
        }
    }

    fn check_prepare_terminate_enable(&self, record: &Arc<AbilityRecord>) -> bool {
        if record.is_terminating() {
            debug!("record is already terminating");
            return false;
        }
        if !record.ability_info().is_ui_ability() {
            debug!("ability model does not support prepare terminate");
            return false;
        }
        self.services()
            .permissions
            .verify_prepare_terminate(record.ability_info().access_token_id)
    }

    /// Prepare-terminate sweep ahead of killing processes: a process whose
    /// abilities all accept termination is killed; one hosting an
    /// objecting ability keeps running and only the accepting sessions are
    /// torn down.
    pub fn kill_process_with_prepare_terminate(self: &Arc<Self>, pids: &[i32]) {
        self.services().app.block_process_cache_by_pids(pids);
        let mut pids_to_kill = Vec::new();
        for &pid in pids {
            let tokens = self.services().app.ability_tokens_of_pid(pid);
            let mut need_kill = true;
            let mut to_terminate = Vec::new();
            for token in tokens {
                let Some(record) = self.get_ability_record_by_token(token) else {
                    continue;
                };
                if self.prepare_terminate_ability(&record) {
                    info!(record_id = record.record_id(), "terminate blocked by ability");
                    need_kill = false;
                    continue;
                }
                to_terminate.push(record);
            }
            if need_kill {
                pids_to_kill.push(pid);
                continue;
            }
            for record in to_terminate {
                self.terminate_session(&record);
            }
        }
        if !pids_to_kill.is_empty() {
            info!(?pids_to_kill, "killing processes");
            self.services().app.kill_processes_by_pids(&pids_to_kill);
        }
    }

    /// Asks the compositor to tear down the record's session.
    pub(crate) fn terminate_session(&self, record: &Arc<AbilityRecord>) {
        let Some(session_info) = record.session_info() else {
            return;
        };
        let Some(token) = session_info.session_token.clone() else {
            return;
        };
        info!(persistent_id = session_info.persistent_id, "terminate session");
        if let Err(err) = token.session().terminate_session(&session_info) {
            warn!(persistent_id = session_info.persistent_id, %err, "terminate session failed");
        }
    }
}
