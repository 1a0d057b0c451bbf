// Cached entry.

use crate::arena::ArenaHandle;
use crate::fingerprint::Fingerprint;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Counters mutated under a per-entry lock even while the caller holds
/// only a shared store-level lock.
#[derive(Debug, Default)]
pub struct EntryCounters {
    pub bypass: u64,
    pub usage: f64,
    pub total_custom_cost: f64,
    pub num_custom_plans: u32,
}

/// Plan and dependency handles, mutated only by a caller holding the store's
/// exclusive lock. `Arc<Entry>` clones can still be held by other threads
/// for reading at the same moment, so this block still needs its own lock
/// to be sound: an exclusive store lock guarantees no *other writer* runs
/// concurrently, not that no reader observes a half-written value.
#[derive(Debug, Default)]
pub struct EntryMeta {
    pub plan_handle: Option<ArenaHandle>,
    pub plan_len: u32,

    pub rels_handle: Option<ArenaHandle>,
    pub num_rels: u32,
    pub rels_len: u32,

    pub invitems_handle: Option<ArenaHandle>,
    pub num_invitems: u32,
    pub invitems_len: u32,

    pub discard: u64,
}

/// A cached generic plan and its bookkeeping.
///
/// Fields split into three mutability classes:
/// - `key`, `plantime`, `generic_cost` are immutable for the entry's
///   lifetime.
/// - `meta` holds everything mutated only under the store's exclusive lock.
/// - `lockers` is a lock-free atomic, movable under the store's shared lock.
/// - `counters` is mutable under the store's shared lock.
#[derive(Debug)]
pub struct Entry {
    pub key: Fingerprint,
    pub plantime: f64,
    pub generic_cost: f64,

    pub lockers: AtomicU32,

    pub meta: Mutex<EntryMeta>,
    pub counters: Mutex<EntryCounters>,
}

impl Entry {
    pub fn new(key: Fingerprint, plantime: f64, generic_cost: f64, initial_usage: f64) -> Self {
        Self {
            key,
            plantime,
            generic_cost,
            lockers: AtomicU32::new(0),
            meta: Mutex::new(EntryMeta::default()),
            counters: Mutex::new(EntryCounters {
                usage: initial_usage,
                ..Default::default()
            }),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lockers.load(Ordering::Acquire) > 0
    }

    pub fn lock(&self) {
        self.lockers.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the lock counter. Saturates at zero rather than wrapping,
    /// guarding against a mismatched `unlock` call.
    pub fn unlock(&self) {
        let _ = self
            .lockers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Record a bypass (cached plan returned instead of re-planning):
    /// increment `bypass` and add `plantime` to `usage`.
    pub fn record_bypass(&self, plantime: f64) {
        let mut counters = self.counters.lock();
        counters.bypass += 1;
        counters.usage += plantime;
    }

    /// Record a custom-plan cost sample taken while below the
    /// generic-plan-adoption threshold: still bumps `usage` so a
    /// recently-seen entry does not evict immediately.
    pub fn record_custom_cost(&self, cost: f64, plantime: f64) {
        let mut counters = self.counters.lock();
        counters.total_custom_cost += cost;
        counters.num_custom_plans += 1;
        counters.usage += plantime;
    }

    pub fn usage(&self) -> f64 {
        self.counters.lock().usage
    }

    pub fn bypass(&self) -> u64 {
        self.counters.lock().bypass
    }

    pub fn num_custom_plans(&self) -> u32 {
        self.counters.lock().num_custom_plans
    }

    pub fn total_custom_cost(&self) -> f64 {
        self.counters.lock().total_custom_cost
    }

    pub fn average_custom_cost(&self) -> Option<f64> {
        let counters = self.counters.lock();
        if counters.num_custom_plans == 0 {
            None
        } else {
            Some(counters.total_custom_cost / counters.num_custom_plans as f64)
        }
    }

    /// Apply LRU usage decay ahead of an eviction sweep.
    pub fn decay_usage(&self, decay: f64) {
        self.counters.lock().usage *= decay;
    }

    /// Snapshot of the plan handle/len, for reading without holding `meta`
    /// across an arena resolve.
    pub fn plan_handle(&self) -> Option<(ArenaHandle, u32)> {
        let meta = self.meta.lock();
        meta.plan_handle.map(|h| (h, meta.plan_len))
    }

    pub fn num_rels(&self) -> u32 {
        self.meta.lock().num_rels
    }

    pub fn num_invitems(&self) -> u32 {
        self.meta.lock().num_invitems
    }

    pub fn discard_generation(&self) -> u64 {
        self.meta.lock().discard
    }

    /// Clear the plan handle, bumping the discard generation. Does not
    /// touch dependency handles or counters — a discarded entry keeps its
    /// statistics. Returns the handle and length the caller must free, if
    /// there was a plan.
    pub fn discard_plan(&self) -> Option<(ArenaHandle, u32)> {
        let mut meta = self.meta.lock();
        meta.discard += 1;
        let freed = meta.plan_handle.take().map(|h| (h, meta.plan_len));
        meta.plan_len = 0;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;

    fn entry() -> Entry {
        Entry::new(Fingerprint::new(0, 1, 2, 3), 5.0, 10.0, 1.0)
    }

    #[test]
    fn record_bypass_updates_counters() {
        let e = entry();
        e.record_bypass(5.0);
        assert_eq!(e.bypass(), 1);
        assert_eq!(e.usage(), 6.0);
    }

    #[test]
    fn record_custom_cost_accumulates() {
        let e = entry();
        e.record_custom_cost(100.0, 2.0);
        e.record_custom_cost(200.0, 2.0);
        assert_eq!(e.num_custom_plans(), 2);
        assert_eq!(e.average_custom_cost(), Some(150.0));
    }

    #[test]
    fn lock_unlock_round_trips() {
        let e = entry();
        assert!(!e.is_locked());
        e.lock();
        e.lock();
        assert!(e.is_locked());
        e.unlock();
        assert!(e.is_locked());
        e.unlock();
        assert!(!e.is_locked());
    }

    #[test]
    fn unlock_without_lock_saturates_at_zero() {
        let e = entry();
        e.unlock();
        assert!(!e.is_locked());
    }

    #[test]
    fn discard_plan_clears_handle_and_bumps_generation() {
        let e = entry();
        assert_eq!(e.discard_generation(), 0);
        assert!(e.discard_plan().is_none());
        assert_eq!(e.discard_generation(), 1);
    }
}
