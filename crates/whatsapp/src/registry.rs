//! Process-wide map of live sessions plus per-id serialization locks.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
};

use crate::session::Session;

/// Live sessions by id. Owned by the manager and injected where needed.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    generations: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a generation number for a new registry entry.
    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Serialize lifecycle work on one id. Different ids never contend.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }

    /// Insert or replace; returns the previous entry.
    pub fn put(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions.insert(session.id().to_string(), session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Whether `id` is still served by the entry of `generation`.
    pub fn is_current(&self, id: &str, generation: u64) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|s| s.generation() == generation)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    /// Remove the entry only if it was created with `generation`.
    pub fn remove_if_generation(&self, id: &str, generation: u64) -> Option<Arc<Session>> {
        self.sessions
            .remove_if(id, |_, s| s.generation() == generation)
            .map(|(_, s)| s)
    }

    /// Snapshot of every live session, in no particular order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| Arc::clone(s.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
