//! Call-binding primitives.
//!
//! A call binding hands the caller a remote callable object for the target
//! ability instead of merely starting it. The target's record owns a
//! [`CallContainer`] tracking the active connections and the callee object
//! once the remote side has produced it.

use std::sync::Arc;

/// Marker for the remote callable object produced by the callee.
pub trait Callee: Send + Sync {}

/// Caller-side callback of one call binding.
pub trait CallConnection: Send + Sync {
    /// Delivers the callee's remote object once it is available.
    fn on_call_done(&self, callee: Arc<dyn Callee>);
}

/// Outcome of resolving a call binding against a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The remote object is available (or an attached scheduler was asked
    /// to produce it); the caller needs no lifecycle round trip.
    HasRemoteObject,
    /// Delivery is deferred until the record reaches a ready state.
    NoRemoteObject,
}

/// Connection bookkeeping owned by one ability record.
#[derive(Default)]
pub struct CallContainer {
    connections: Vec<Arc<dyn CallConnection>>,
    callee: Option<Arc<dyn Callee>>,
}

impl CallContainer {
    /// Registers a connection and delivers the callee if one is already
    /// known. Returns whether delivery happened.
    pub fn resolve(&mut self, connection: &Arc<dyn CallConnection>) -> bool {
        if !self
            .connections
            .iter()
            .any(|existing| Arc::ptr_eq(existing, connection))
        {
            self.connections.push(Arc::clone(connection));
        }
        match &self.callee {
            Some(callee) => {
                connection.on_call_done(Arc::clone(callee));
                true
            },
            None => false,
        }
    }

    /// Stores the callee object and delivers it to every connection.
    pub fn call_request_done(&mut self, callee: Arc<dyn Callee>) {
        self.callee = Some(Arc::clone(&callee));
        for connection in &self.connections {
            connection.on_call_done(Arc::clone(&callee));
        }
    }

    /// Returns whether `connection` is registered here.
    #[must_use]
    pub fn is_exist_connection(&self, connection: &Arc<dyn CallConnection>) -> bool {
        self.connections
            .iter()
            .any(|existing| Arc::ptr_eq(existing, connection))
    }

    /// Removes `connection`; returns whether it was registered.
    pub fn release(&mut self, connection: &Arc<dyn CallConnection>) -> bool {
        let before = self.connections.len();
        self.connections
            .retain(|existing| !Arc::ptr_eq(existing, connection));
        self.connections.len() != before
    }

    /// Whether a call request must still be issued to the remote side.
    #[must_use]
    pub fn is_need_to_call_request(&self) -> bool {
        !self.connections.is_empty() && self.callee.is_none()
    }

    /// Whether no connections remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
