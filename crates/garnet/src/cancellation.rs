//
// cancellation.rs
//
// Registry of request ids the client asked to abandon
//

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tower_lsp::jsonrpc::Id;

#[derive(Debug, Default)]
struct Ids {
    /// Requests received and not yet answered
    in_flight: HashSet<Id>,
    cancelled: HashSet<Id>,
}

/// Shared set of cancelled request ids.
///
/// The transport reader registers each request as it is queued and applies
/// `$/cancelRequest` directly, so a cancel can overtake the queue. The router
/// polls before and after running a handler. Both entries go away when the
/// request completes, and cancels for requests that are not in flight are
/// dropped, so finished ids never pile up.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    ids: Arc<Mutex<Ids>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn ids(&self) -> MutexGuard<'_, Ids> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a request that has been received but not answered.
    pub fn register(&self, id: Id) {
        self.ids().in_flight.insert(id);
    }

    /// Mark an in-flight request cancelled. Returns false when the id is not
    /// in flight (already answered or never seen).
    pub fn cancel(&self, id: Id) -> bool {
        let mut ids = self.ids();
        if !ids.in_flight.contains(&id) {
            log::trace!("Ignoring cancel for request {} that is not in flight", id);
            return false;
        }
        log::trace!("Marking request {} as cancelled", id);
        ids.cancelled.insert(id);
        true
    }

    pub fn is_cancelled(&self, id: &Id) -> bool {
        self.ids().cancelled.contains(id)
    }

    /// Drop the entries for a finished request. Returns true if the request
    /// had been cancelled, in which case its reply must be suppressed.
    pub fn complete(&self, id: &Id) -> bool {
        let mut ids = self.ids();
        ids.in_flight.remove(id);
        ids.cancelled.remove(id)
    }

    /// Number of cancelled requests still awaiting completion.
    pub fn len(&self) -> usize {
        self.ids().cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().cancelled.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.ids().in_flight.len()
    }
}

/// Target id of a `$/cancelRequest` notification.
///
/// Read with the same id type requests are keyed by, so any id the client
/// sent on a request can be cancelled.
pub fn cancel_target(params: &Value) -> Option<Id> {
    match serde_json::from_value(params.get("id")?.clone()).ok()? {
        Id::Null => None,
        id => Some(id),
    }
}
