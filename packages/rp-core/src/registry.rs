//! Centralized session registry (§9 REDESIGN FLAGS: "Pervasive locks on
//! `ConcurrentDictionary<session_id,...>`... centralize in a single
//! `SessionRegistry`").
//!
//! Grounded on `stream/manager.rs`'s `StreamRegistry` (a `DashMap<String,
//! Arc<Mutex<StreamState>>>` keyed by stream id), generalized from one
//! audio stream per key to one `RPStream` per session id. Unlike that
//! teacher type, entries here are not re-wrapped in an extra `Mutex`: an
//! `RPStream` already owns its own internal lock granularity per field (§5
//! "Shared resources"), so `SessionRegistry` only needs to hand out the
//! `Arc` callers already share.
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

/// Holds one entry per live session behind its own `DashMap` shard, so that
/// one session's lookup never blocks another's (§5 "Shared resources").
pub struct SessionRegistry<T> {
    sessions: DashMap<Uuid, Arc<T>>,
}

impl<T> SessionRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, id: Uuid, value: Arc<T>) {
        self.sessions.insert(id, value);
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Arc<T>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<T>> {
        self.sessions.remove(&id).map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_returns_the_same_entry() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        let id = Uuid::from_u128(1);
        registry.insert(id, Arc::new(42));
        let entry = registry.get(id).unwrap();
        assert_eq!(*entry, 42);
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        let id = Uuid::from_u128(2);
        registry.insert(id, Arc::new(1));
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn independent_sessions_are_tracked_independently() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        registry.insert(Uuid::from_u128(1), Arc::new(1));
        registry.insert(Uuid::from_u128(2), Arc::new(2));
        assert_eq!(registry.len(), 2);
        assert_eq!(*registry.get(Uuid::from_u128(2)).unwrap(), 2);
    }
}
