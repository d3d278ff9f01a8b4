//! Pending-call registry.
//!
//! Maps outstanding call ids to the oneshot slots their callers await on.
//! Responses arrive in any order; the id is the only correlation key.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::Frame;

#[derive(Debug, Default)]
pub(crate) struct CallRegistry {
    pending: Mutex<HashMap<u64, oneshot::Sender<Frame>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot for `id` and hand back its receiving half.
    ///
    /// Ids are allocated from a strictly increasing counter, so a duplicate
    /// means a bug in the caller.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        let prev = self.pending.lock().insert(id, tx);
        assert!(prev.is_none(), "call id {id} already registered");
        rx
    }

    /// Deliver a response into the slot for `id`.
    ///
    /// Returns false when no slot exists (unknown or already-resolved id).
    /// Delivery into a dropped receiver (caller timed out) is a no-op.
    pub fn resolve(&self, id: u64, frame: Frame) -> bool {
        match self.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(frame);
                true
            }
            None => false,
        }
    }

    /// Drop every pending slot; each awaiting caller observes cancellation.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "cancelling pending calls");
        }
        pending.clear();
    }

    pub fn pending_ids(&self) -> Vec<u64> {
        self.pending.lock().keys().copied().collect()
    }
}
