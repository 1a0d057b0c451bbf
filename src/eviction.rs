// Eviction: LRU-ish usage decay and capacity-triggered reclamation, run
// under the store's exclusive lock when insertion finds the store full.

use crate::arbitration::USAGE_DECREASE_FACTOR;
use crate::arena::Arena;
use crate::entry::Entry;
use crate::fingerprint::Fingerprint;
use crate::rdepend::ReverseIndex;
use crate::store::{free_entry_arena, EntryStore};
use std::sync::Arc;

/// Outcome of a sweep, fed into the global accounting snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepResult {
    pub decayed: u32,
    pub evicted: u32,
    pub median_usage: f64,
}

/// `max(10, ceil(0.05 * n))` — the bottom-N reclamation width.
fn reclaim_width(n: usize) -> usize {
    let fraction = (n as f64 * 0.05).ceil() as usize;
    fraction.max(10).min(n)
}

/// Run one eviction sweep:
///
/// 1. Decay every entry's `usage` by [`USAGE_DECREASE_FACTOR`].
/// 2. Sort ascending by `usage`.
/// 3. Record the median as `cur_median_usage`.
/// 4. Remove the bottom `max(10, ceil(0.05*N))` entries via the full
///    remove path (free arena, unregister reverse deps for every
///    dependency the entry recorded).
///
/// Must be called with the store's exclusive lock already held by the
/// caller.
pub fn sweep(
    store: &EntryStore,
    rdepend: &ReverseIndex,
    arena: &Arena,
    rels_of: impl Fn(&Entry) -> Vec<u32>,
    invitems_of: impl Fn(&Entry) -> Vec<(crate::fingerprint::ObjectClass, u32)>,
) -> SweepResult {
    let mut snapshot: Vec<(Fingerprint, Arc<Entry>)> = Vec::new();
    store.for_each(|k, v| {
        v.decay_usage(USAGE_DECREASE_FACTOR);
        snapshot.push((*k, v.clone()));
    });

    if snapshot.is_empty() {
        return SweepResult {
            decayed: 0,
            evicted: 0,
            median_usage: crate::arbitration::ASSUMED_MEDIAN_INIT,
        };
    }

    snapshot.sort_by(|a, b| a.1.usage().partial_cmp(&b.1.usage()).unwrap());
    let median_usage = snapshot[snapshot.len() / 2].1.usage();

    let width = reclaim_width(snapshot.len());
    let mut evicted = 0u32;
    for (key, entry) in snapshot.into_iter().take(width) {
        if let Some(removed) = store.remove(&key) {
            unregister_all(&removed, &rels_of, &invitems_of, removed.key.db_id, rdepend);
            free_entry_arena(&removed, arena);
            evicted += 1;
        }
    }

    SweepResult {
        decayed: evicted,
        evicted,
        median_usage,
    }
}

fn unregister_all(
    entry: &Entry,
    rels_of: &impl Fn(&Entry) -> Vec<u32>,
    invitems_of: &impl Fn(&Entry) -> Vec<(crate::fingerprint::ObjectClass, u32)>,
    db_id: u32,
    rdepend: &ReverseIndex,
) {
    for rel in rels_of(entry) {
        rdepend.unregister(
            crate::fingerprint::RdependKey::relation(db_id, rel),
            entry.key,
        );
    }
    for (class, object) in invitems_of(entry) {
        let rkey = crate::fingerprint::RdependKey {
            db_id,
            class_id: class,
            object,
        };
        rdepend.unregister(rkey, entry.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::ObjectClass;

    fn key(n: u64) -> Fingerprint {
        Fingerprint::new(0, 1, n, 0)
    }

    fn no_deps(_: &Entry) -> Vec<u32> {
        vec![]
    }

    fn no_invitems(_: &Entry) -> Vec<(ObjectClass, u32)> {
        vec![]
    }

    #[test]
    fn reclaim_width_floor_is_ten() {
        assert_eq!(reclaim_width(20), 10);
        assert_eq!(reclaim_width(1000), 50);
    }

    #[test]
    fn sweep_removes_bottom_entries_by_usage() {
        let arena = Arena::new(4096);
        let rdepend = ReverseIndex::new(50);
        let store = EntryStore::new(100);
        for i in 0..20u64 {
            let k = key(i);
            let e = Entry::new(k, 1.0, 1.0, i as f64);
            store.insert_new(k, e);
        }
        let result = sweep(&store, &rdepend, &arena, no_deps, no_invitems);
        assert_eq!(result.evicted, 10);
        assert_eq!(store.len(), 10);
        // The ten lowest-usage entries (0..10) should be gone, highest
        // (10..20) should remain.
        for i in 10..20u64 {
            assert!(store.lookup(&key(i)).is_some());
        }
        for i in 0..10u64 {
            assert!(store.lookup(&key(i)).is_none());
        }
    }

    #[test]
    fn sweep_on_empty_store_is_a_no_op() {
        let arena = Arena::new(4096);
        let rdepend = ReverseIndex::new(50);
        let store = EntryStore::new(100);
        let result = sweep(&store, &rdepend, &arena, no_deps, no_invitems);
        assert_eq!(result.evicted, 0);
    }

    #[test]
    fn sweep_decays_survivors_usage() {
        let arena = Arena::new(4096);
        let rdepend = ReverseIndex::new(50);
        let store = EntryStore::new(100);
        for i in 0..20u64 {
            let k = key(i);
            store.insert_new(k, Entry::new(k, 1.0, 1.0, 100.0));
        }
        sweep(&store, &rdepend, &arena, no_deps, no_invitems);
        let survivor = store.lookup(&key(15)).unwrap();
        assert!((survivor.usage() - 99.0).abs() < 0.5);
    }
}
