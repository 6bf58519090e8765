//! Keyed timeout tasks with first-class cancellation.
//!
//! Every supervised remote transaction gets a watchdog registered under
//! `(kind, record id)`. When the awaited event arrives first, the watchdog
//! is cancelled by key, so a stale timeout can never act on a record that
//! has already progressed. Posting a timer under an occupied key replaces
//! (and aborts) the previous one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Which remote transaction a watchdog supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// Process load / ability-thread attach.
    Load,
    /// Foreground transaction.
    Foreground,
    /// Background transaction.
    Background,
    /// Terminate confirmation.
    Terminate,
}

impl TimeoutKind {
    /// Static name for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry of pending watchdog tasks.
///
/// Requires a running tokio runtime; tasks fire on the runtime's timer.
#[derive(Default)]
pub struct TimerRegistry {
    tasks: Mutex<HashMap<(TimeoutKind, i64), JoinHandle<()>>>,
}

impl TimerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` to run after `delay` unless cancelled first.
    pub fn post<F>(self: &Arc<Self>, kind: TimeoutKind, record_id: i64, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry
                .tasks
                .lock()
                .expect("timer lock poisoned")
                .remove(&(kind, record_id));
            task();
        });
        let previous = self
            .tasks
            .lock()
            .expect("timer lock poisoned")
            .insert((kind, record_id), handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancels the watchdog under `(kind, record_id)`; returns whether one
    /// was pending.
    pub fn cancel(&self, kind: TimeoutKind, record_id: i64) -> bool {
        let handle = self
            .tasks
            .lock()
            .expect("timer lock poisoned")
            .remove(&(kind, record_id));
        match handle {
            Some(handle) => {
                handle.abort();
                true
            },
            None => false,
        }
    }

    /// Number of pending watchdogs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.lock().expect("timer lock poisoned").len()
    }
}
