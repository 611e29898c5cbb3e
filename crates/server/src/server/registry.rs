//! Registry of active sessions.
//!
//! An ordered map from player identity to session behind a single
//! reader-writer lock. Every operation takes the lock once, so inserts,
//! removals and snapshots are linearizable with respect to each other.

use super::session::Session;
use crate::error::RegistryError;
use crate::player::PlayerId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<PlayerId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. An existing entry for `id` is never replaced.
    pub fn insert(&self, id: PlayerId, session: Arc<Session>) -> Result<(), RegistryError> {
        self.insert_with(id, || Ok(session)).map(|_| ())
    }

    /// Register the session built by `make`, which only runs if `id` is
    /// free. The registry stays locked while `make` runs, so whatever it
    /// sets up becomes visible together with the entry.
    pub fn insert_with<E, F>(&self, id: PlayerId, make: F) -> Result<Arc<Session>, E>
    where
        E: From<RegistryError>,
        F: FnOnce() -> Result<Arc<Session>, E>,
    {
        let mut sessions = self.sessions.write();
        match sessions.entry(id) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(id).into()),
            Entry::Vacant(slot) => {
                let session = make()?;
                slot.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Remove the entry for `id`, if any.
    pub fn remove(&self, id: PlayerId) -> Option<Arc<Session>> {
        self.sessions.write().remove(&id)
    }

    pub fn get(&self, id: PlayerId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Point-in-time copy of all sessions, ordered by identity.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Human-readable listing of every active session.
    pub fn describe(&self) -> String {
        let mut result = String::from("Active Connections:");
        for session in self.snapshot() {
            result.push('\n');
            result.push_str(&session.to_string());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::player::{Player, User};
    use crate::server::session::Outbound;
    use protocol::Position;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn session(id: PlayerId) -> Arc<Session> {
        let user = User::new(id, format!("p{id}"));
        let player = Player::new(&user, Position::ZERO, &PlayerConfig::default());
        let (outbound, _rx) = Outbound::channel(1);
        Arc::new(Session::new(user, player, outbound, None))
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let registry = SessionRegistry::new();
        let first = session(1);
        registry.insert(1, Arc::clone(&first)).unwrap();

        assert_eq!(registry.insert(1, session(1)), Err(RegistryError::Duplicate(1)));
        assert!(Arc::ptr_eq(&registry.get(1).unwrap(), &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_with_skips_builder_on_duplicate() {
        let registry = SessionRegistry::new();
        registry.insert(5, session(5)).unwrap();

        let mut built = false;
        let result: Result<_, RegistryError> = registry.insert_with(5, || {
            built = true;
            Ok(session(5))
        });
        assert!(result.is_err());
        assert!(!built);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.insert(2, session(2)).unwrap();
        assert!(registry.remove(2).is_some());
        assert!(registry.remove(2).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let registry = SessionRegistry::new();
        for id in [9, 3, 7, 1] {
            registry.insert(id, session(id)).unwrap();
        }
        let ids: Vec<PlayerId> = registry.snapshot().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![1, 3, 7, 9]);
        assert!(registry.describe().starts_with("Active Connections:"));
        assert_eq!(registry.describe().lines().count(), 5);
    }

    #[test]
    fn test_concurrent_register_and_remove() {
        const N: u64 = 64;
        let registry = Arc::new(SessionRegistry::new());
        let done = Arc::new(AtomicBool::new(false));

        let observer = {
            let registry = Arc::clone(&registry);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut scans = 0;
                while !done.load(Ordering::Acquire) || scans == 0 {
                    let ids: Vec<PlayerId> = registry.snapshot().iter().map(|s| s.id()).collect();
                    let unique: HashSet<PlayerId> = ids.iter().copied().collect();
                    assert_eq!(unique.len(), ids.len(), "snapshot contains duplicates");
                    scans += 1;
                }
            })
        };

        let inserters: Vec<_> = (0..N)
            .map(|id| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.insert(id, session(id)).unwrap())
            })
            .collect();
        for handle in inserters {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), N as usize);

        let removers: Vec<_> = (0..N)
            .map(|id| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || assert!(registry.remove(id).is_some()))
            })
            .collect();
        for handle in removers {
            handle.join().unwrap();
        }

        done.store(true, Ordering::Release);
        observer.join().unwrap();
        assert!(registry.is_empty());
    }
}
