//! Trait seams toward the application side.
//!
//! The engine never talks to an application process directly: a record's
//! attached [`AbilityScheduler`] is whatever proxy the host platform binds
//! after the process attaches, and start requests may carry an
//! [`AbilityInfoCallback`] the framework uses to observe token assignment
//! and specified-mode routing.

use crate::record::Token;
use crate::want::Want;

/// Proxy to an attached ability thread.
///
/// All methods are one-way: completion is reported back through the
/// manager's transaction-done entry points.
pub trait AbilityScheduler: Send + Sync {
    /// Schedules a foreground transaction.
    fn schedule_foreground(&self, want: &Want, scene_flag: u32);

    /// Schedules a background transaction.
    fn schedule_background(&self, want: &Want);

    /// Schedules a terminate transaction.
    fn schedule_terminate(&self, want: &Want);

    /// Asks the ability to produce its callee object for call bindings.
    fn call_request(&self);

    /// Delivers a result to a caller that started for a result.
    fn send_result(&self, request_code: i32, result_code: i32, want: &Want);

    /// Synchronously asks the ability whether it objects to termination.
    ///
    /// Invoked from a worker task; the manager bounds the wait.
    fn prepare_terminate(&self) -> bool;
}

/// Process/token codes returned by the specified-ability notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecifiedRequestCodes {
    /// Process code to stamp onto the request want; `0` means none.
    pub proc_code: i64,
    /// Token code to stamp onto the request want; `0` means none.
    pub token_code: i64,
}

/// Framework callback attached to a start request.
pub trait AbilityInfoCallback: Send + Sync {
    /// Reports the token assigned to the started ability.
    fn notify_ability_token(&self, token: Token, want: &Want);

    /// Reports that a specified-mode start is being dispatched; the
    /// callback may return routing codes to stamp onto the request.
    fn notify_start_specified_ability(
        &self,
        caller: Option<Token>,
        want: &Want,
        request_code: i32,
    ) -> Option<SpecifiedRequestCodes>;

    /// Reports that an existing specified-mode instance is being reused.
    fn notify_restart_specified_ability(&self, token: Token);
}
