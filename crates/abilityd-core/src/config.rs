//! Timeout configuration for lifecycle supervision.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Watchdog multiplier applied to the terminate timeout.
pub const KILL_TIMEOUT_MULTIPLE: u32 = 3;
/// Bounded-wait multiplier applied to the prepare-terminate query.
pub const PREPARE_TERMINATE_TIMEOUT_MULTIPLE: u32 = 10;

/// Timeout budgets for remote lifecycle transactions.
///
/// The defaults match interactive expectations; tests shrink them to keep
/// watchdog paths fast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Budget for a cold process to attach its ability thread, and the base
    /// unit the terminate and prepare-terminate bounds are derived from.
    pub app_start_timeout: Duration,
    /// Budget for a foreground transaction to complete.
    pub foreground_timeout: Duration,
    /// Budget for a background transaction to complete.
    pub background_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            app_start_timeout: Duration::from_secs(5),
            foreground_timeout: Duration::from_secs(6),
            background_timeout: Duration::from_secs(3),
        }
    }
}

impl TimeoutConfig {
    /// Bound after which a hung remote terminate is forced through locally.
    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        self.app_start_timeout * KILL_TIMEOUT_MULTIPLE
    }

    /// Bound on the blocking prepare-terminate query.
    #[must_use]
    pub fn prepare_terminate_timeout(&self) -> Duration {
        self.app_start_timeout * PREPARE_TERMINATE_TIMEOUT_MULTIPLE
    }
}
