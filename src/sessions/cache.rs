use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::store::SessionStore;
use crate::identity::RequestId;

/// Request id → store for requests currently in flight.
///
/// Entries are inserted by `start`/`regenerate` and must be removed by the
/// caller (or `destroy`) when the request completes.
#[derive(Default)]
pub struct RequestCache {
    entries: RwLock<HashMap<RequestId, Arc<SessionStore>>>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, request_id: &RequestId) -> Option<Arc<SessionStore>> {
        self.entries.read().get(request_id).cloned()
    }

    /// Insert, replacing any earlier entry for the same request.
    pub fn insert(&self, request_id: RequestId, store: Arc<SessionStore>) {
        self.entries.write().insert(request_id, store);
    }

    pub fn remove(&self, request_id: &RequestId) -> Option<Arc<SessionStore>> {
        self.entries.write().remove(request_id)
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.entries.read().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
