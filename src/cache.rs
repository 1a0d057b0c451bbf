// Top-level wiring: request arbitration, the insertion protocol, and DDL
// dispatch.

use crate::arbitration::{self, Decision, ASSUMED_MEDIAN_INIT};
use crate::arena::{Arena, ArenaHandle};
use crate::config::PlanCacheConfig;
use crate::entry::Entry;
use crate::eviction;
use crate::fingerprint::{Fingerprint, InvalItem, ObjectClass, RdependKey};
use crate::host;
use crate::introspect::{EntrySnapshot, GlobalAccounting, GlobalSnapshot};
use crate::invalidate::{classify, DdlObserver, DdlStatement, InvalidationKind};
use crate::rdepend::ReverseIndex;
use crate::store::EntryStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What [`PlanCache::plan_request`] tells the caller to do.
#[derive(Debug, Clone)]
pub enum PlanRequestOutcome {
    /// Use this cached, cost-biased plan; skip re-planning.
    UseCached { plan_bytes: Vec<u8>, biased_cost: f64 },
    /// Plan a custom plan. If it ends up exceeding `min_plan_time`, call
    /// [`PlanCache::try_insert`] with the result.
    PlanCustom { hit: Option<Arc<Entry>> },
}

/// Result of [`PlanCache::try_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Updated,
    NotCached,
}

/// Process-wide shared generic plan cache.
pub struct PlanCache {
    config: PlanCacheConfig,
    arena: Arena,
    store: EntryStore,
    rdepend: ReverseIndex,
    accounting: GlobalAccounting,
    /// Median `usage` observed by the most recent eviction sweep, stored as
    /// bit-pattern so newly created entries can seed from it without a
    /// lock. Starts at `ASSUMED_MEDIAN_INIT` before any sweep has run.
    cur_median_usage: AtomicU64,
}

impl PlanCache {
    pub fn new(config: PlanCacheConfig, arena_capacity_bytes: u32) -> Self {
        let rdepend_max = config.rdepend_max();
        let max_entries = config.max_entries();
        Self {
            config,
            arena: Arena::new(arena_capacity_bytes),
            store: EntryStore::new(max_entries),
            rdepend: ReverseIndex::new(rdepend_max),
            accounting: GlobalAccounting::default(),
            cur_median_usage: AtomicU64::new(ASSUMED_MEDIAN_INIT.to_bits()),
        }
    }

    pub fn config(&self) -> &PlanCacheConfig {
        &self.config
    }

    /// Look up `key` and decide whether the host should reuse a cached
    /// plan or build a custom one. The caller has already run
    /// [`crate::walker::fingerprint`] to confirm cacheability and build
    /// `key`; this probes the store and, on hit, asks the arbitrator to
    /// decide.
    pub fn plan_request(&self, key: &Fingerprint) -> PlanRequestOutcome {
        if !self.config.enabled() || self.config.disable_plan_cache() {
            return PlanRequestOutcome::PlanCustom { hit: None };
        }
        let Some(entry) = self.store.lookup(key) else {
            return PlanRequestOutcome::PlanCustom { hit: None };
        };
        let Some((plan_handle, plan_len)) = entry.plan_handle() else {
            return PlanRequestOutcome::PlanCustom { hit: Some(entry) };
        };
        if entry.is_locked() {
            return PlanRequestOutcome::PlanCustom { hit: Some(entry) };
        }
        match arbitration::arbitrate(
            &entry,
            self.config.threshold(),
            entry.num_rels(),
            self.config.disable_plan_cache(),
        ) {
            Decision::UseCached { biased_cost } => {
                let plan_bytes = self.arena.resolve(plan_handle, plan_len);
                entry.record_bypass(entry.plantime);
                PlanRequestOutcome::UseCached {
                    plan_bytes,
                    biased_cost,
                }
            }
            Decision::PlanCustom => PlanRequestOutcome::PlanCustom { hit: Some(entry) },
        }
    }

    /// Called by the host after it plans a custom plan within the
    /// accumulation window, so the running average has data to arbitrate
    /// against.
    pub fn record_custom_cost(&self, entry: &Entry, cost: f64, plantime: f64) {
        entry.record_custom_cost(cost, plantime);
    }

    /// Stage, register, and commit a new or updated cache entry. `rels`
    /// and `invitems` are the dependency lists the host derived for the
    /// plan being cached.
    pub fn try_insert(
        &self,
        key: Fingerprint,
        plan_bytes: &[u8],
        rels: &[u32],
        invitems: &[InvalItem],
        plantime: f64,
        generic_cost: f64,
    ) -> InsertOutcome {
        if self.config.read_only() || plantime < self.config.min_plan_time_ms() as f64 {
            return InsertOutcome::NotCached;
        }

        // Step 1: serialize + allocate the plan buffer outside any lock.
        let Some(plan_handle) = self.arena.allocate_copy(plan_bytes) else {
            debug!(?key, "arena exhausted, not caching");
            return InsertOutcome::NotCached;
        };
        let plan_len = plan_bytes.len() as u32;

        // Step 2: allocate the relation list and non-relation invalidation
        // items, if non-empty.
        let rels_bytes = host::encode(&rels.to_vec());
        let rels_handle = match Self::allocate_optional(&self.arena, rels.is_empty(), &rels_bytes)
        {
            Ok(h) => h,
            Err(()) => {
                self.arena.free(plan_handle, plan_len);
                debug!(?key, "arena exhausted allocating rels, not caching");
                return InsertOutcome::NotCached;
            }
        };

        let invitems_bytes = host::encode(&invitems.to_vec());
        let invitems_handle =
            match Self::allocate_optional(&self.arena, invitems.is_empty(), &invitems_bytes) {
                Ok(h) => h,
                Err(()) => {
                    self.arena.free(plan_handle, plan_len);
                    if let Some(h) = rels_handle {
                        self.arena.free(h, rels_bytes.len() as u32);
                    }
                    debug!(?key, "arena exhausted allocating invitems, not caching");
                    return InsertOutcome::NotCached;
                }
            };

        // Steps 3-5: register dependencies. Each registration is checked
        // against `rdepend_max`; any failure unwinds everything staged so
        // far, symmetrically, before giving up.
        let mut registered = Vec::new();
        for &rel in rels {
            let rkey = RdependKey::relation(key.db_id, rel);
            if self.rdepend.register(rkey, key).is_err() {
                self.rollback_registrations(&registered, key);
                self.free_staged(plan_handle, plan_len, rels_handle, &rels_bytes, invitems_handle, &invitems_bytes);
                warn!(?key, "reverse index saturated on relation, not caching");
                return InsertOutcome::NotCached;
            }
            registered.push(rkey);
        }
        for item in invitems {
            let rkey = RdependKey {
                db_id: key.db_id,
                class_id: item.class_id,
                object: item.object_hash,
            };
            if self.rdepend.register(rkey, key).is_err() {
                self.rollback_registrations(&registered, key);
                self.free_staged(plan_handle, plan_len, rels_handle, &rels_bytes, invitems_handle, &invitems_bytes);
                warn!(?key, "reverse index saturated on invitem, not caching");
                return InsertOutcome::NotCached;
            }
            registered.push(rkey);
        }

        // Step 6: land it in the store.
        match self.store.lookup(&key) {
            None => {
                if self.store.is_full() {
                    let swept = eviction::sweep(
                        &self.store,
                        &self.rdepend,
                        &self.arena,
                        |e| Self::resolve_rels(&self.arena, e),
                        |e| Self::resolve_invitems(&self.arena, e),
                    );
                    self.accounting.record_dealloc(swept.evicted);
                    if swept.evicted > 0 {
                        self.cur_median_usage
                            .store(swept.median_usage.to_bits(), Ordering::Relaxed);
                    }
                }
                let entry = Entry::new(key, plantime, generic_cost, self.current_median_usage());
                {
                    let mut meta = entry.meta.lock();
                    meta.plan_handle = Some(plan_handle);
                    meta.plan_len = plan_len;
                    meta.rels_handle = rels_handle;
                    meta.num_rels = rels.len() as u32;
                    meta.rels_len = rels_bytes.len() as u32;
                    meta.invitems_handle = invitems_handle;
                    meta.num_invitems = invitems.len() as u32;
                    meta.invitems_len = invitems_bytes.len() as u32;
                }
                self.store.insert_new(key, entry);
                InsertOutcome::Inserted
            }
            Some(existing) => {
                if existing.is_locked() {
                    // Entry is locked: discard the freshly prepared plan
                    // and reverse-index entries, we may not cache while
                    // locked.
                    self.rollback_registrations(&registered, key);
                    self.free_staged(plan_handle, plan_len, rels_handle, &rels_bytes, invitems_handle, &invitems_bytes);
                    return InsertOutcome::NotCached;
                }
                let had_plan = existing.plan_handle().is_some();
                if had_plan {
                    // Entry already has a plan: keep it, our freshly
                    // staged plan buffer is unused.
                    self.arena.free(plan_handle, plan_len);
                } else {
                    let mut meta = existing.meta.lock();
                    meta.plan_handle = Some(plan_handle);
                    meta.plan_len = plan_len;
                    debug!(?key, "repopulating discarded entry");
                }
                self.reconcile_dependencies(
                    &existing,
                    key,
                    rels_handle,
                    &rels_bytes,
                    rels,
                    invitems_handle,
                    &invitems_bytes,
                    invitems,
                );
                InsertOutcome::Updated
            }
        }
    }

    fn allocate_optional(arena: &Arena, empty: bool, bytes: &[u8]) -> Result<Option<ArenaHandle>, ()> {
        if empty {
            Ok(None)
        } else {
            arena.allocate_copy(bytes).map(Some).ok_or(())
        }
    }

    fn rollback_registrations(&self, registered: &[RdependKey], key: Fingerprint) {
        for rk in registered {
            self.rdepend.unregister(*rk, key);
        }
    }

    fn free_staged(
        &self,
        plan_handle: ArenaHandle,
        plan_len: u32,
        rels_handle: Option<ArenaHandle>,
        rels_bytes: &[u8],
        invitems_handle: Option<ArenaHandle>,
        invitems_bytes: &[u8],
    ) {
        self.arena.free(plan_handle, plan_len);
        if let Some(h) = rels_handle {
            self.arena.free(h, rels_bytes.len() as u32);
        }
        if let Some(h) = invitems_handle {
            self.arena.free(h, invitems_bytes.len() as u32);
        }
    }

    /// Reconcile an existing entry's dependency arrays with a freshly
    /// staged set: unregister anything dropped, then replace the arrays.
    #[allow(clippy::too_many_arguments)]
    fn reconcile_dependencies(
        &self,
        existing: &Arc<Entry>,
        key: Fingerprint,
        new_rels_handle: Option<ArenaHandle>,
        new_rels_bytes: &[u8],
        new_rels: &[u32],
        new_invitems_handle: Option<ArenaHandle>,
        new_invitems_bytes: &[u8],
        new_invitems: &[InvalItem],
    ) {
        let old_rels = Self::resolve_rels(&self.arena, existing);
        let old_invitems = Self::resolve_invitems(&self.arena, existing);

        for rel in &old_rels {
            if !new_rels.contains(rel) {
                self.rdepend.unregister(RdependKey::relation(key.db_id, *rel), key);
            }
        }
        for (class, object) in &old_invitems {
            let still_present = new_invitems
                .iter()
                .any(|i| i.class_id == *class && i.object_hash == *object);
            if !still_present {
                self.rdepend.unregister(
                    RdependKey {
                        db_id: key.db_id,
                        class_id: *class,
                        object: *object,
                    },
                    key,
                );
            }
        }

        let mut meta = existing.meta.lock();
        if let Some(h) = meta.rels_handle {
            self.arena.free(h, meta.rels_len);
        }
        if let Some(h) = meta.invitems_handle {
            self.arena.free(h, meta.invitems_len);
        }
        meta.rels_handle = new_rels_handle;
        meta.num_rels = new_rels.len() as u32;
        meta.rels_len = new_rels_bytes.len() as u32;
        meta.invitems_handle = new_invitems_handle;
        meta.num_invitems = new_invitems.len() as u32;
        meta.invitems_len = new_invitems_bytes.len() as u32;
    }

    fn resolve_rels(arena: &Arena, entry: &Entry) -> Vec<u32> {
        let meta = entry.meta.lock();
        match meta.rels_handle {
            Some(h) => host::decode(&arena.resolve(h, meta.rels_len)).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn resolve_invitems(arena: &Arena, entry: &Entry) -> Vec<(ObjectClass, u32)> {
        let meta = entry.meta.lock();
        match meta.invitems_handle {
            Some(h) => {
                let items: Vec<InvalItem> =
                    host::decode(&arena.resolve(h, meta.invitems_len)).unwrap_or_default();
                items.into_iter().map(|i| (i.class_id, i.object_hash)).collect()
            }
            None => Vec::new(),
        }
    }

    /// Seed value for a brand-new entry's `usage`: the median observed by
    /// the last eviction sweep, so new entries start competitive with
    /// established ones instead of always starting cold.
    fn current_median_usage(&self) -> f64 {
        f64::from_bits(self.cur_median_usage.load(Ordering::Relaxed))
    }

    /// DDL dispatch. Non-locking kinds (`Discard`, `Evict`,
    /// `ResetWholeDatabase`) are applied immediately and return the count
    /// of affected entries. `LockThenUnlock` is handled by
    /// [`PlanCache::begin_lock_window`] instead, since it straddles a host
    /// DDL suspension point.
    pub fn apply_ddl(&self, stmt: &DdlStatement, observer: &dyn DdlObserver) -> u64 {
        let classification = classify(stmt, observer);
        match classification.kind {
            InvalidationKind::Discard => self.discard_targets(&classification.targets),
            InvalidationKind::Evict => self.evict_targets(&classification.targets),
            InvalidationKind::ResetWholeDatabase => self.reset(0, 0, 0),
            InvalidationKind::LockThenUnlock => {
                let window = self.begin_lock_window(&classification.targets);
                window.finish(self)
            }
        }
    }

    fn discard_targets(&self, targets: &[RdependKey]) -> u64 {
        let mut count = 0u64;
        let mut seen = Vec::new();
        for target in targets {
            for fp in self.rdepend.peek(target) {
                if seen.contains(&fp) {
                    continue;
                }
                seen.push(fp);
                if let Some(entry) = self.store.lookup(&fp) {
                    if entry.is_locked() {
                        continue;
                    }
                    if let Some((handle, len)) = entry.discard_plan() {
                        self.arena.free(handle, len);
                        count += 1;
                        debug!(?fp, "discarded plan");
                    }
                }
            }
        }
        count
    }

    fn evict_targets(&self, targets: &[RdependKey]) -> u64 {
        let mut count = 0u64;
        let mut seen = Vec::new();
        for target in targets {
            for fp in self.rdepend.peek(target) {
                if seen.contains(&fp) {
                    continue;
                }
                seen.push(fp);
                if let Some(removed) = self.store.remove(&fp) {
                    let rels = Self::resolve_rels(&self.arena, &removed);
                    let invitems = Self::resolve_invitems(&self.arena, &removed);
                    for rel in rels {
                        self.rdepend.unregister(RdependKey::relation(fp.db_id, rel), fp);
                    }
                    for (class, object) in invitems {
                        self.rdepend.unregister(
                            RdependKey {
                                db_id: fp.db_id,
                                class_id: class,
                                object,
                            },
                            fp,
                        );
                    }
                    crate::store::free_entry_arena(&removed, &self.arena);
                    count += 1;
                    self.accounting.record_dealloc(1);
                    debug!(?fp, "evicted entry");
                }
            }
        }
        count
    }

    /// Begin a LOCK-class DDL window: discard plans and bump `lockers` for
    /// every target. The caller must run the host DDL
    /// itself, then call [`LockWindow::finish`] (done automatically by
    /// [`PlanCache::apply_ddl`] for statements classified `LockThenUnlock`;
    /// exposed separately for hosts that need to run real DDL in between).
    pub fn begin_lock_window(&self, targets: &[RdependKey]) -> LockWindow {
        let mut locked = Vec::new();
        let mut seen = Vec::new();
        for target in targets {
            for fp in self.rdepend.peek(target) {
                if seen.contains(&fp) {
                    continue;
                }
                seen.push(fp);
                if let Some(entry) = self.store.lookup(&fp) {
                    entry.lock();
                    if let Some((handle, len)) = entry.discard_plan() {
                        self.arena.free(handle, len);
                    }
                    locked.push(fp);
                }
            }
        }
        LockWindow { locked }
    }

    /// Reset entries matching the filter; all-zero means "all".
    pub fn reset(&self, user_id: u32, db_id: u32, query_id: u64) -> u64 {
        let removed = self.store.retain_not_matching(user_id, db_id, query_id, &self.arena);
        self.accounting.note_reset();
        removed
    }

    pub fn entry_snapshots(&self) -> Vec<EntrySnapshot> {
        let mut out = Vec::new();
        self.store.for_each(|k, v| {
            let rels = Self::resolve_rels(&self.arena, v);
            out.push(EntrySnapshot::capture(k, v, rels));
        });
        out
    }

    pub fn global_snapshot(&self) -> GlobalSnapshot {
        GlobalSnapshot {
            rdepend_num: self.rdepend.num_keys(),
            alloced_size: self.arena.alloced_size(),
            dealloc: self.accounting.dealloc(),
            stats_reset_tick: self.accounting.stats_reset_tick(),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// The window during which `lockers > 0` across a LOCK-class DDL's
/// suspension. A side effect the host is responsible for applying: the
/// current worker should suppress new caching (`read_only = on`) for the
/// remainder of its transaction while this window is open, since the
/// DDL's outcome is not yet committed.
pub struct LockWindow {
    locked: Vec<Fingerprint>,
}

impl LockWindow {
    pub fn finish(self, cache: &PlanCache) -> u64 {
        let mut count = 0u64;
        for fp in &self.locked {
            if let Some(entry) = cache.store.lookup(fp) {
                entry.unlock();
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlanCacheConfigBuilder;

    fn small_cache() -> PlanCache {
        let config = PlanCacheConfigBuilder {
            max_entries: 10,
            threshold: 4,
            ..Default::default()
        }
        .build()
        .unwrap();
        PlanCache::new(config, 64 * 1024)
    }

    struct NoFamily;
    impl DdlObserver for NoFamily {
        fn ancestors_of(&self, _relation: u32) -> Vec<u32> {
            vec![]
        }
        fn inheritors_of(&self, _relation: u32) -> Vec<u32> {
            vec![]
        }
    }

    #[test]
    fn insert_then_hit_then_bypass_after_threshold() {
        let cache = small_cache();
        let key = Fingerprint::new(0, 1, 42, 0);
        assert_eq!(
            cache.try_insert(key, b"generic plan", &[100], &[], 20.0, 5.0),
            InsertOutcome::Inserted
        );

        let entry = cache.store.lookup(&key).unwrap();
        for _ in 0..4 {
            cache.record_custom_cost(&entry, 50.0, 20.0);
        }

        match cache.plan_request(&key) {
            PlanRequestOutcome::UseCached { plan_bytes, .. } => {
                assert_eq!(plan_bytes, b"generic plan");
            }
            PlanRequestOutcome::PlanCustom { .. } => panic!("expected cached hit"),
        }
        assert_eq!(entry.bypass(), 1);
    }

    #[test]
    fn below_min_plan_time_is_not_cached() {
        let cache = small_cache();
        let key = Fingerprint::new(0, 1, 42, 0);
        assert_eq!(
            cache.try_insert(key, b"plan", &[], &[], 1.0, 5.0),
            InsertOutcome::NotCached
        );
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn drop_index_ddl_discards_dependent_entry() {
        let cache = small_cache();
        let key = Fingerprint::new(0, 1, 42, 0);
        cache.try_insert(key, b"plan bytes", &[100], &[], 20.0, 5.0);
        let entry = cache.store.lookup(&key).unwrap();
        assert!(entry.plan_handle().is_some());

        let count = cache.apply_ddl(
            &DdlStatement::DropIndex {
                db_id: 1,
                parent_relation: 100,
            },
            &NoFamily,
        );
        assert_eq!(count, 1);
        let entry = cache.store.lookup(&key).unwrap();
        assert!(entry.plan_handle().is_none());
        assert_eq!(entry.discard_generation(), 1);
    }

    #[test]
    fn drop_table_evicts_entry_entirely() {
        let cache = small_cache();
        let key = Fingerprint::new(0, 1, 42, 0);
        cache.try_insert(key, b"plan bytes", &[100], &[], 20.0, 5.0);

        let count = cache.apply_ddl(
            &DdlStatement::DropRelation {
                db_id: 1,
                relation: 100,
            },
            &NoFamily,
        );
        assert_eq!(count, 1);
        assert!(cache.store.lookup(&key).is_none());
    }

    #[test]
    fn concurrent_index_lock_window_blocks_then_releases() {
        let cache = small_cache();
        let key = Fingerprint::new(0, 1, 42, 0);
        cache.try_insert(key, b"plan bytes", &[100], &[], 20.0, 5.0);

        let targets = vec![RdependKey::relation(1, 100)];
        let window = cache.begin_lock_window(&targets);
        let entry = cache.store.lookup(&key).unwrap();
        assert!(entry.is_locked());
        assert!(entry.plan_handle().is_none());

        // Reinsertion attempts during the window discard their staged
        // plan rather than caching.
        let outcome = cache.try_insert(key, b"new plan", &[100], &[], 20.0, 5.0);
        assert_eq!(outcome, InsertOutcome::NotCached);

        window.finish(&cache);
        let entry = cache.store.lookup(&key).unwrap();
        assert!(!entry.is_locked());
    }

    #[test]
    fn reset_all_empties_store_and_resets_dealloc() {
        let cache = small_cache();
        for i in 0..3u64 {
            cache.try_insert(Fingerprint::new(0, 1, i, 0), b"plan", &[], &[], 20.0, 5.0);
        }
        assert_eq!(cache.len(), 3);
        let removed = cache.reset(0, 0, 0);
        assert_eq!(removed, 3);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.global_snapshot().dealloc, 0);
    }

    #[test]
    fn second_planner_reconciles_instead_of_overwriting() {
        // Two concurrent planners racing the same miss both insert; the
        // second observes the present entry and reconciles dependencies
        // rather than clobbering the first.
        let cache = small_cache();
        let key = Fingerprint::new(0, 1, 42, 0);
        assert_eq!(
            cache.try_insert(key, b"plan one", &[100], &[], 20.0, 5.0),
            InsertOutcome::Inserted
        );
        assert_eq!(
            cache.try_insert(key, b"plan two", &[100, 200], &[], 20.0, 5.0),
            InsertOutcome::Updated
        );
        let entry = cache.store.lookup(&key).unwrap();
        let (handle, len) = entry.plan_handle().unwrap();
        assert_eq!(cache.arena.resolve(handle, len), b"plan one");
        assert_eq!(entry.num_rels(), 2);
    }
}
