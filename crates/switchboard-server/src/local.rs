//! Sessions owned by this process.

use std::sync::Arc;

use dashmap::DashMap;
use switchboard_core::SessionId;

use crate::owner::ConnectionOwner;

/// Local-ownership table consulted before any broker round trip.
#[derive(Default)]
pub struct LocalSessions {
    owners: DashMap<SessionId, Arc<ConnectionOwner>>,
}

impl LocalSessions {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, owner: Arc<ConnectionOwner>) {
        let _ = self.owners.insert(owner.session_id().clone(), owner);
    }

    pub(crate) fn remove(&self, id: &SessionId) -> Option<Arc<ConnectionOwner>> {
        self.owners.remove(id).map(|(_, owner)| owner)
    }

    /// Owner of `id`, if this process holds its push connection.
    pub fn get(&self, id: &SessionId) -> Option<Arc<ConnectionOwner>> {
        self.owners.get(id).map(|entry| entry.value().clone())
    }

    /// Whether this process owns `id`.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.owners.contains_key(id)
    }

    /// Number of locally owned sessions.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no sessions are owned locally.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Snapshot of every owner, for shutdown.
    pub fn owners(&self) -> Vec<Arc<ConnectionOwner>> {
        self.owners.iter().map(|entry| entry.value().clone()).collect()
    }
}
