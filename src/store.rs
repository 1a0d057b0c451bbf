// Entry Store: fixed-capacity fingerprint -> Entry map behind a single
// reader-writer lock.

use crate::arena::Arena;
use crate::entry::Entry;
use crate::fingerprint::Fingerprint;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Guards the fingerprint -> entry map with one reader-writer lock.
/// Per-entry counters stay mutable under a shared read guard because they
/// live behind [`crate::entry::Entry`]'s own mutex; everything else
/// (handles, `discard`) requires the writer guard this type hands out
/// through `insert_new`/`remove`.
pub struct EntryStore {
    max_entries: u32,
    map: RwLock<HashMap<Fingerprint, Arc<Entry>>>,
}

impl EntryStore {
    pub fn new(max_entries: u32) -> Self {
        Self {
            max_entries,
            map: RwLock::new(HashMap::with_capacity(max_entries as usize)),
        }
    }

    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    /// `lookup(key) -> entry?` under shared lock.
    pub fn lookup(&self, key: &Fingerprint) -> Option<Arc<Entry>> {
        self.map.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_entries as usize
    }

    /// Insert a brand new entry. Caller must already have confirmed there
    /// is capacity (run eviction first otherwise).
    pub fn insert_new(&self, key: Fingerprint, entry: Entry) -> Arc<Entry> {
        let entry = Arc::new(entry);
        self.map.write().insert(key, entry.clone());
        entry
    }

    /// Detach an entry from the map under the exclusive lock. The caller is
    /// responsible for freeing its arena handles and unregistering its
    /// dependency lists from the reverse index — the store itself knows
    /// nothing about the reverse index; reverse-index operations never take
    /// the store's lock.
    pub fn remove(&self, key: &Fingerprint) -> Option<Arc<Entry>> {
        self.map.write().remove(key)
    }

    /// Visit every live entry, for introspection.
    pub fn for_each(&self, mut visitor: impl FnMut(&Fingerprint, &Arc<Entry>)) {
        for (k, v) in self.map.read().iter() {
            visitor(k, v);
        }
    }

    /// Remove every entry matching a reset filter: a zero field in the
    /// filter means "don't filter on this field".
    pub fn retain_not_matching(
        &self,
        user_id: u32,
        db_id: u32,
        query_id: u64,
        arena: &Arena,
    ) -> u64 {
        let mut map = self.map.write();
        let mut removed = 0u64;
        map.retain(|key, entry| {
            let matches = (user_id == 0 || key.user_id == user_id)
                && (db_id == 0 || key.db_id == db_id)
                && (query_id == 0 || key.query_id == query_id);
            if matches {
                free_entry_arena(entry, arena);
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&self, arena: &Arena) -> u64 {
        self.retain_not_matching(0, 0, 0, arena)
    }
}

/// Free every arena allocation owned by `entry`. Shared by `remove` paths
/// in [`crate::cache`] and by `retain_not_matching` above.
pub fn free_entry_arena(entry: &Entry, arena: &Arena) {
    let meta = entry.meta.lock();
    if let Some(h) = meta.plan_handle {
        arena.free(h, meta.plan_len);
    }
    if let Some(h) = meta.rels_handle {
        arena.free(h, meta.rels_len);
    }
    if let Some(h) = meta.invitems_handle {
        arena.free(h, meta.invitems_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u64) -> Fingerprint {
        Fingerprint::new(0, 1, n, 0)
    }

    #[test]
    fn lookup_miss_then_hit() {
        let store = EntryStore::new(10);
        assert!(store.lookup(&key(1)).is_none());
        store.insert_new(key(1), Entry::new(key(1), 1.0, 1.0, 1.0));
        assert!(store.lookup(&key(1)).is_some());
    }

    #[test]
    fn capacity_tracks_len() {
        let store = EntryStore::new(2);
        assert!(!store.is_full());
        store.insert_new(key(1), Entry::new(key(1), 1.0, 1.0, 1.0));
        store.insert_new(key(2), Entry::new(key(2), 1.0, 1.0, 1.0));
        assert!(store.is_full());
    }

    #[test]
    fn remove_detaches_from_map() {
        let store = EntryStore::new(10);
        store.insert_new(key(1), Entry::new(key(1), 1.0, 1.0, 1.0));
        assert!(store.remove(&key(1)).is_some());
        assert!(store.lookup(&key(1)).is_none());
    }

    #[test]
    fn reset_all_empties_store() {
        let arena = Arena::new(1024);
        let store = EntryStore::new(10);
        store.insert_new(key(1), Entry::new(key(1), 1.0, 1.0, 1.0));
        store.insert_new(key(2), Entry::new(key(2), 1.0, 1.0, 1.0));
        let removed = store.clear(&arena);
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn reset_filters_by_db_id() {
        let arena = Arena::new(1024);
        let store = EntryStore::new(10);
        let a = Fingerprint::new(0, 1, 1, 0);
        let b = Fingerprint::new(0, 2, 1, 0);
        store.insert_new(a, Entry::new(a, 1.0, 1.0, 1.0));
        store.insert_new(b, Entry::new(b, 1.0, 1.0, 1.0));
        let removed = store.retain_not_matching(0, 1, 0, &arena);
        assert_eq!(removed, 1);
        assert!(store.lookup(&a).is_none());
        assert!(store.lookup(&b).is_some());
    }
}
