// Reverse-Dependency Index.
//
// A sharded map whose per-shard `RwLock`s serve as bucket-level locks,
// independent of the entry store's own lock. Callers already hold the
// store's lock (shared or exclusive) before touching this index, so no
// extra coordination is layered on top here.

use crate::fingerprint::{Fingerprint, RdependKey};
use dashmap::DashMap;

/// Error returned when a registration would exceed `rdepend_max` for a
/// given key. The caller treats this exactly like arena exhaustion:
/// "cannot cache", unwind everything staged so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saturated;

pub struct ReverseIndex {
    buckets: DashMap<RdependKey, Vec<Fingerprint>>,
    max_per_key: u32,
}

impl ReverseIndex {
    pub fn new(max_per_key: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            max_per_key,
        }
    }

    /// `register(rkey, fingerprint)`. Fails with [`Saturated`] once the
    /// key's fanout would exceed `rdepend_max`.
    pub fn register(&self, rkey: RdependKey, fp: Fingerprint) -> Result<(), Saturated> {
        let mut bucket = self.buckets.entry(rkey).or_default();
        if bucket.contains(&fp) {
            return Ok(());
        }
        if bucket.len() as u32 >= self.max_per_key {
            return Err(Saturated);
        }
        bucket.push(fp);
        Ok(())
    }

    /// `unregister(rkey, fingerprint)`. Used both for normal dependency
    /// reconciliation and to unwind a partially-staged insertion.
    pub fn unregister(&self, rkey: RdependKey, fp: Fingerprint) {
        if let Some(mut bucket) = self.buckets.get_mut(&rkey) {
            bucket.retain(|f| f != &fp);
            if bucket.is_empty() {
                drop(bucket);
                self.buckets.remove(&rkey);
            }
        }
    }

    /// Copy the dependents list out and remove the bucket. The bucket lock
    /// is released as soon as the copy completes (`DashMap::remove` does
    /// this internally); the caller is free to act on the copied list
    /// without holding any reverse-index lock.
    pub fn find_and_pop(&self, rkey: &RdependKey) -> Vec<Fingerprint> {
        self.buckets.remove(rkey).map(|(_, v)| v).unwrap_or_default()
    }

    /// Non-destructive peek, used by introspection and tests.
    pub fn peek(&self, rkey: &RdependKey) -> Vec<Fingerprint> {
        self.buckets
            .get(rkey)
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    /// Count of distinct keys currently tracked, feeding `rdepend_num` in
    /// the global introspection snapshot.
    pub fn num_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u64) -> Fingerprint {
        Fingerprint::new(0, 1, n, 0)
    }

    #[test]
    fn register_then_find_and_pop() {
        let idx = ReverseIndex::new(10);
        let key = RdependKey::relation(1, 100);
        idx.register(key, fp(1)).unwrap();
        idx.register(key, fp(2)).unwrap();
        let popped = idx.find_and_pop(&key);
        assert_eq!(popped.len(), 2);
        assert!(idx.peek(&key).is_empty());
    }

    #[test]
    fn register_respects_rdepend_max() {
        let idx = ReverseIndex::new(2);
        let key = RdependKey::relation(1, 100);
        idx.register(key, fp(1)).unwrap();
        idx.register(key, fp(2)).unwrap();
        assert_eq!(idx.register(key, fp(3)), Err(Saturated));
    }

    #[test]
    fn register_is_idempotent_for_same_fingerprint() {
        let idx = ReverseIndex::new(1);
        let key = RdependKey::relation(1, 100);
        idx.register(key, fp(1)).unwrap();
        assert!(idx.register(key, fp(1)).is_ok());
    }

    #[test]
    fn unregister_drops_empty_bucket() {
        let idx = ReverseIndex::new(10);
        let key = RdependKey::relation(1, 100);
        idx.register(key, fp(1)).unwrap();
        idx.unregister(key, fp(1));
        assert_eq!(idx.num_keys(), 0);
    }

    #[test]
    fn distinct_classes_do_not_share_buckets() {
        let idx = ReverseIndex::new(10);
        let rel = RdependKey::relation(1, 100);
        let ty = RdependKey::ty(1, 100);
        idx.register(rel, fp(1)).unwrap();
        assert!(idx.peek(&ty).is_empty());
    }
}
