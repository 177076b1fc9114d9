use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use tracing::{debug, warn};

use super::wire::{PeerId, PositionRecord, Viewport};

/// Reserved key holding the ordered list of known peer ids.
pub const SESSION_INDEX_KEY: &str = "sessions";

/// Minimal string key/value surface of the shared persistent store the
/// alternate transport runs over.
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// Shared in-memory store. Clones share one underlying map, standing in
/// for the persistent store all windows of one origin see.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.lock().expect("store lock poisoned").remove(key);
    }
}

/// Presence over a shared store instead of a live bus: each session writes
/// its own record under its id and keeps itself listed in the shared
/// index; readers rebuild the peer set from the index every pass.
///
/// The index update is a read-modify-write with no atomicity, so two
/// sessions joining at the same instant can lose one of the index writes.
/// The loser's record exists but is never read until a later join rewrites
/// the index. The race is inherited from the medium and accepted.
pub struct StoreSession<S: SessionStore> {
    store: S,
    record: PositionRecord,
}

impl<S: SessionStore> StoreSession<S> {
    /// Lists the session in the shared index and writes its first record.
    pub fn join(store: S, record: PositionRecord) -> Self {
        let mut ids = read_index(&store);
        if !ids.contains(&record.id) {
            ids.push(record.id);
        }
        write_index(&store, &ids);
        let session = Self { store, record };
        session.write_record();
        debug!(peer = %session.record.id, "session listed in store index");
        session
    }

    pub fn id(&self) -> PeerId {
        self.record.id
    }

    /// Rewrites this session's record with fresh geometry. Called once per
    /// tick by the owner; everyone else only ever reads it.
    pub fn update(&mut self, viewport: Viewport) {
        self.record.screen_offset = viewport.screen_offset;
        self.record.size = viewport.size;
        self.write_record();
    }

    /// All currently readable peer records. A listed id whose value is
    /// missing or unparsable is treated as "peer gone" and skipped.
    pub fn sessions(&self) -> Vec<PositionRecord> {
        let mut records = Vec::new();
        for id in read_index(&self.store) {
            let Some(raw) = self.store.get(&id.to_string()) else {
                debug!(peer = %id, "indexed peer has no record, skipping");
                continue;
            };
            match serde_json::from_str::<PositionRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(peer = %id, "unparsable record in store, skipping: {e}");
                }
            }
        }
        records
    }

    /// Removes both the record and the index entry. Idempotent, so a
    /// repeated teardown signal is harmless.
    pub fn leave(&mut self) {
        self.store.remove(&self.record.id.to_string());
        let ids: Vec<PeerId> = read_index(&self.store)
            .into_iter()
            .filter(|id| *id != self.record.id)
            .collect();
        write_index(&self.store, &ids);
        debug!(peer = %self.record.id, "session removed from store index");
    }

    fn write_record(&self) {
        let raw = serde_json::to_string(&self.record)
            .expect("position record serializes");
        self.store.set(&self.record.id.to_string(), raw);
    }
}

fn read_index<S: SessionStore>(store: &S) -> Vec<PeerId> {
    store
        .get(SESSION_INDEX_KEY)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn write_index<S: SessionStore>(store: &S, ids: &[PeerId]) {
    let raw = serde_json::to_string(ids).expect("peer id list serializes");
    store.set(SESSION_INDEX_KEY, raw);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::wire::{Extent, Point};

    fn record(x: f64) -> PositionRecord {
        PositionRecord::from_viewport(
            PeerId::generate(),
            Viewport {
                screen_offset: Point { x, y: 0.0 },
                size: Extent { w: 800.0, h: 600.0 },
            },
        )
    }

    #[test]
    fn join_lists_and_leave_unlists() {
        let store = MemoryStore::new();
        let mut one = StoreSession::join(store.clone(), record(1.0));
        let two = StoreSession::join(store.clone(), record(2.0));

        let ids: Vec<_> =
            two.sessions().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![one.id(), two.id()]);

        one.leave();
        let ids: Vec<_> =
            two.sessions().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![two.id()]);
        assert!(store.get(&one.id().to_string()).is_none());

        // duplicate teardown must not disturb the survivors
        one.leave();
        assert_eq!(two.sessions().len(), 1);
    }

    #[test]
    fn update_overwrites_own_record() {
        let store = MemoryStore::new();
        let mut session = StoreSession::join(store, record(1.0));
        session.update(Viewport {
            screen_offset: Point { x: 300.0, y: 40.0 },
            size: Extent { w: 1024.0, h: 768.0 },
        });
        let sessions = session.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].screen_offset.x, 300.0);
        assert_eq!(sessions[0].size.h, 768.0);
    }

    #[test]
    fn missing_or_junk_records_are_skipped() {
        let store = MemoryStore::new();
        let session = StoreSession::join(store.clone(), record(1.0));

        // a peer listed in the index with no record behind it
        let ghost = PeerId::generate();
        let mut ids = vec![session.id(), ghost];
        store.set(
            SESSION_INDEX_KEY,
            serde_json::to_string(&ids).unwrap(),
        );
        assert_eq!(session.sessions().len(), 1);

        // and one whose record does not parse
        let junk = PeerId::generate();
        ids.push(junk);
        store.set(
            SESSION_INDEX_KEY,
            serde_json::to_string(&ids).unwrap(),
        );
        store.set(&junk.to_string(), "{definitely not json".to_owned());
        assert_eq!(session.sessions().len(), 1);
    }

    #[test]
    fn corrupt_index_reads_as_empty() {
        let store = MemoryStore::new();
        store.set(SESSION_INDEX_KEY, "42".to_owned());
        let session = StoreSession::join(store, record(1.0));
        // join overwrote the corrupt index with a fresh one
        assert_eq!(session.sessions().len(), 1);
    }
}
