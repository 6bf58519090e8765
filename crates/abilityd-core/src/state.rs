//! Lifecycle state machine types.
//!
//! An ability progresses through [`AbilityState`] along a fixed set of
//! edges:
//!
//! ```text
//! Initial ──load/attach──► Foregrounding ──► Foreground
//!                               ▲               │
//!                               │           minimize/close
//!                               │               ▼
//!                          Backgrounding ──► Background ──► Terminating
//! ```
//!
//! Out-of-order remote reports are rejected by the dispatch guards in the
//! runtime crate rather than silently applied. A second intent arriving
//! while a transition is in flight is queued in [`PendingState`] (one slot,
//! last writer wins) and consumed when the in-flight transition completes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current lifecycle state of an ability record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbilityState {
    /// Created but not yet attached to a running process.
    Initial,
    /// A foreground transaction is in flight on the remote side.
    Foregrounding,
    /// Visible and interactive.
    Foreground,
    /// The last foreground transaction failed.
    ForegroundFailed,
    /// A background transaction is in flight on the remote side.
    Backgrounding,
    /// Alive but not visible.
    Background,
    /// Termination has been requested; awaiting remote confirmation.
    Terminating,
}

impl AbilityState {
    /// Returns the state name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Foregrounding => "Foregrounding",
            Self::Foreground => "Foreground",
            Self::ForegroundFailed => "ForegroundFailed",
            Self::Backgrounding => "Backgrounding",
            Self::Background => "Background",
            Self::Terminating => "Terminating",
        }
    }

    /// Returns whether the ability is foreground or on its way there.
    #[must_use]
    pub const fn is_foreground(self) -> bool {
        matches!(self, Self::Foreground | Self::Foregrounding)
    }
}

impl fmt::Display for AbilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queued lifecycle intent held while a conflicting transition is in
/// flight.
///
/// `Initial` means no transition is pending. At most one intent is queued
/// per record; a further request overwrites the slot rather than forming a
/// FIFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingState {
    /// No queued intent, and no transition in flight.
    #[default]
    Initial,
    /// Re-foreground once the in-flight transition completes.
    Foreground,
    /// Background once the in-flight transition completes.
    Background,
}

/// Lifecycle outcome reported by the remote ability thread when a
/// scheduled transaction completes.
///
/// The exhaustive match over this type in the runtime's dispatcher replaces
/// the original control flow's unreachable "unsupported state" fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Terminate transaction finished; the ability is back to initial.
    Initial,
    /// Foreground transaction succeeded.
    Foreground,
    /// Foreground transaction failed.
    ForegroundFailed,
    /// Foreground transaction failed: the requested window mode is invalid.
    ForegroundInvalidMode,
    /// Foreground transaction failed: the window was frozen.
    ForegroundWindowFrozen,
    /// Background transaction succeeded.
    Background,
    /// Background transaction failed; treated as backgrounded regardless.
    BackgroundFailed,
}

/// Visibility of a foreground ability toward the compositor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbilityVisibilityState {
    /// Never set; the ability was not started through a visibility-aware
    /// process mode.
    #[default]
    Unspecified,
    /// Set at creation, before the first foreground completes.
    Initial,
    /// Foreground and shown.
    ForegroundShow,
    /// Foreground but hidden.
    ForegroundHide,
}

/// Why an ability instance was launched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchReason {
    /// Plain start request.
    #[default]
    StartAbility,
    /// Started to satisfy a call binding.
    Call,
    /// Relaunched by the recovery framework after an abnormal exit.
    AppRecovery,
    /// Migrated in from another device.
    Continuation,
}

/// Process-level state reported by the application process manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    /// The process finished loading and is ready.
    Ready,
    /// The process moved to foreground.
    Foreground,
    /// The process moved to background.
    Background,
    /// The process was suspended.
    Suspended,
    /// The process terminated.
    Terminated,
    /// The process is fully gone.
    End,
    /// The process is cold starting.
    ColdStart,
}

/// Cause of an application's previous exit, consulted at record creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitCause {
    /// No recorded cause.
    #[default]
    Unknown,
    /// Ordinary user-driven exit.
    Normal,
    /// Native crash.
    Crash,
    /// Unhandled JS/ArkTS error.
    JsError,
    /// Killed after a lifecycle freeze.
    Freeze,
    /// Killed by resource control.
    ResourceControl,
    /// Killed for an application upgrade.
    Upgrade,
}

/// A previous-exit record delivered to a relaunched ability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReason {
    /// Why the application exited.
    pub cause: ExitCause,
    /// Free-form detail, if any was recorded.
    pub message: String,
}
