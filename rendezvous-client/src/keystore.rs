//! Per-peer shared keys.
//!
//! An entry is written once, on the first successful derivation for a peer,
//! and never overwritten. Keys live only in memory and are zeroized when the
//! last reference drops.

use crate::crypto::SharedKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rendezvous_types::ClientId;
use std::sync::Arc;

/// Concurrent map of peer id to shared key.
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: DashMap<ClientId, Arc<SharedKey>>,
}

impl KeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `key` for `peer` unless one is already present.
    ///
    /// Returns `true` if this call stored the key. Atomic against concurrent
    /// inserts for the same peer: exactly one caller wins.
    pub fn insert_if_absent(&self, peer: ClientId, key: SharedKey) -> bool {
        match self.keys.entry(peer) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(key));
                true
            }
        }
    }

    /// Key shared with `peer`.
    pub fn get(&self, peer: &ClientId) -> Option<Arc<SharedKey>> {
        self.keys.get(peer).map(|k| Arc::clone(k.value()))
    }

    /// Whether a key exists for `peer`.
    pub fn contains(&self, peer: &ClientId) -> bool {
        self.keys.contains_key(peer)
    }

    /// Peers with an established key.
    pub fn peers(&self) -> Vec<ClientId> {
        self.keys.iter().map(|e| *e.key()).collect()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
