use hashbrown::HashMap;

use super::wire::{PeerId, PositionRecord};

/// The local, authoritative view of which peers are alive and where their
/// windows are. Each id maps to at most one record and the latest upsert
/// wins; arrival order off the transport is the only ordering signal there
/// is. Entries never expire on their own: a peer that vanishes without a
/// departure message stays here until something else removes it.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PositionRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Inserts or overwrites the record under `record.id`. Idempotent.
    pub fn upsert(&mut self, record: PositionRecord) {
        self.peers.insert(record.id, record);
    }

    /// Deletes the entry for `id`. A no-op when absent, so duplicate or
    /// out-of-order departure messages are harmless.
    pub fn remove(&mut self, id: PeerId) {
        self.peers.remove(&id);
    }

    pub fn get(&self, id: PeerId) -> Option<&PositionRecord> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All current records, in no particular order.
    pub fn snapshot(&self) -> Vec<PositionRecord> {
        self.peers.values().cloned().collect()
    }

    /// Every ordered pair (a, b) with a != b, for connecting each peer to
    /// every other peer: n peers yield n*(n-1) pairs, both directions of
    /// each edge. Renderers that want undirected edges can de-duplicate by
    /// a canonical pair key.
    pub fn pairs(&self) -> Vec<(PeerId, PeerId)> {
        let n = self.peers.len();
        let mut out = Vec::with_capacity(n.saturating_mul(n.saturating_sub(1)));
        for a in self.peers.keys() {
            for b in self.peers.keys() {
                if a != b {
                    out.push((*a, *b));
                }
            }
        }
        out
    }
}
