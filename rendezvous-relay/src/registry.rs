//! Directory of live connections.
//!
//! The registry maps each [`ClientId`] to the outbound handle of its
//! connection. It is the only shared mutable state on the relay; sessions
//! add themselves before `setup` is written (the id in `setup` is the
//! registered one) and remove themselves on exit.

use crate::error::RegistryError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rendezvous_types::{ClientId, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Sending side of a connection's outbound queue.
pub type ConnectionHandle = mpsc::Sender<Frame>;

#[derive(Debug)]
struct Registration<H> {
    seq: u64,
    handle: H,
}

/// Concurrent map of registered clients.
#[derive(Debug)]
pub struct ConnectionRegistry<H = ConnectionHandle> {
    entries: DashMap<ClientId, Registration<H>>,
    next_seq: AtomicU64,
}

impl<H: Clone> ConnectionRegistry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateClient`] if `id` is already present;
    /// the existing entry is left untouched.
    pub fn add(&self, id: ClientId, handle: H) -> Result<(), RegistryError> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateClient(id)),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                // Returned guard holds the shard lock; drop it before len().
                drop(slot.insert(Registration { seq, handle }));
            }
        }
        tracing::debug!(client = %id, total = self.entries.len(), "registered");
        Ok(())
    }

    /// Deregister `id`. Returns whether an entry was actually removed.
    pub fn remove(&self, id: &ClientId) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            tracing::debug!(client = %id, remaining = self.entries.len(), "deregistered");
        }
        removed
    }

    /// Handle for `id`, if registered.
    pub fn get(&self, id: &ClientId) -> Option<H> {
        self.entries.get(id).map(|e| e.handle.clone())
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered ids in registration order.
    ///
    /// Point-in-time view: concurrent adds and removes may or may not be
    /// reflected, but no id appears twice.
    pub fn snapshot(&self) -> Vec<ClientId> {
        let mut ids: Vec<(u64, ClientId)> =
            self.entries.iter().map(|e| (e.seq, *e.key())).collect();
        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// All `(id, handle)` pairs, for fan-out.
    pub fn handles(&self) -> Vec<(ClientId, H)> {
        self.entries
            .iter()
            .map(|e| (*e.key(), e.handle.clone()))
            .collect()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: Clone> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn add_get_remove() {
        let registry = ConnectionRegistry::<u32>::new();
        let id = ClientId::random();

        registry.add(id, 7).unwrap();
        assert_eq!(registry.get(&id), Some(7));
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id));
        assert_eq!(registry.get(&id), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let registry = ConnectionRegistry::<u32>::new();
        let id = ClientId::random();

        registry.add(id, 1).unwrap();
        assert_eq!(registry.add(id, 2), Err(RegistryError::DuplicateClient(id)));
        // First handle survives.
        assert_eq!(registry.get(&id), Some(1));
    }

    #[test]
    fn remove_reports_exactly_once() {
        let registry = ConnectionRegistry::<u32>::new();
        let id = ClientId::random();
        registry.add(id, 1).unwrap();

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(!registry.remove(&ClientId::random()));
    }

    #[test]
    fn snapshot_is_in_registration_order() {
        let registry = ConnectionRegistry::<u32>::new();
        let ids: Vec<ClientId> = (0..20).map(|_| ClientId::random()).collect();
        for (n, id) in ids.iter().enumerate() {
            registry.add(*id, n as u32).unwrap();
        }
        assert_eq!(registry.snapshot(), ids);

        registry.remove(&ids[3]);
        let expected: Vec<ClientId> = ids
            .iter()
            .copied()
            .filter(|id| *id != ids[3])
            .collect();
        assert_eq!(registry.snapshot(), expected);
    }

    #[test]
    fn handles_cover_every_entry() {
        let registry = ConnectionRegistry::<u32>::new();
        let a = ClientId::random();
        let b = ClientId::random();
        registry.add(a, 1).unwrap();
        registry.add(b, 2).unwrap();

        let mut handles = registry.handles();
        handles.sort_by_key(|(_, h)| *h);
        assert_eq!(handles, vec![(a, 1), (b, 2)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_remove_snapshot() {
        let registry = Arc::new(ConnectionRegistry::<u64>::new());
        let mut tasks = Vec::new();

        for worker in 0..8u64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..200u64 {
                    let id = ClientId::random();
                    registry.add(id, worker * 1000 + n).unwrap();

                    let snapshot = registry.snapshot();
                    let unique: HashSet<_> = snapshot.iter().collect();
                    assert_eq!(unique.len(), snapshot.len());

                    assert!(registry.remove(&id));
                    assert_eq!(registry.get(&id), None);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_of_same_id_admits_one() {
        let registry = Arc::new(ConnectionRegistry::<u32>::new());
        let id = ClientId::random();

        let tasks: Vec<_> = (0..16u32)
            .map(|n| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.add(id, n).is_ok() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }
}
