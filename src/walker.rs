// Walker / Fingerprint.
//
// The parsed query is an external collaborator; this module defines the
// contract a host AST must satisfy to be fingerprinted, plus the pure
// hash-combine that walks it. No allocation beyond the accumulator, visits
// each node's exposed data exactly once.

/// What the walker needs from a host's parsed query. Implemented by the
/// host's AST wrapper; this crate never constructs one itself outside of
/// tests.
pub trait CacheableQuery {
    /// True if any referenced relation is a temporary relation.
    fn has_temp_relation(&self) -> bool;

    /// True if any referenced view is backed by something other than a
    /// single SELECT rule.
    fn has_non_simple_view(&self) -> bool;

    /// True if the query references a function the current user lacks
    /// EXECUTE privilege on.
    fn has_privilege_violation(&self) -> bool;

    /// Serialized bytes of every literal constant in the tree, in visit
    /// order. Each call yields one constant's bytes.
    fn literal_constants(&self) -> &[Vec<u8>];

    /// Column aliases from range-table entries and the target list.
    fn column_aliases(&self) -> &[String];

    fn is_inheritance_query(&self) -> bool;
    fn limit_option(&self) -> Option<u8>;
    fn grouping_levels_up(&self) -> u32;
    fn xml_element_name(&self) -> Option<&str>;
    fn parameter_collation(&self) -> Option<u32>;
}

/// Outcome of [`fingerprint`]: either a `const_id` plus diagnostic count,
/// or a rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    Cacheable { const_id: u32, num_const: u32 },
    NonCacheable,
}

/// FNV-1a-style mixer: a pure, allocation-free 32-bit hash combiner. No
/// external hashing crate is needed for this.
struct Mixer(u32);

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

impl Mixer {
    fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    fn mix_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u32;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn mix_u32(&mut self, v: u32) {
        self.mix_bytes(&v.to_le_bytes());
    }

    fn mix_str(&mut self, s: &str) {
        self.mix_bytes(s.as_bytes());
    }

    fn finish(self) -> u32 {
        self.0
    }
}

/// Walk `query` once, rejecting non-cacheable shapes and hash-combining
/// every syntactic fragment the host's own query-id hash ignores but that
/// could still change the plan's result.
pub fn fingerprint(query: &dyn CacheableQuery) -> WalkOutcome {
    if query.has_temp_relation() || query.has_non_simple_view() {
        return WalkOutcome::NonCacheable;
    }
    if query.has_privilege_violation() {
        return WalkOutcome::NonCacheable;
    }

    let mut mixer = Mixer::new();
    let constants = query.literal_constants();
    for c in constants {
        mixer.mix_bytes(c);
    }
    for alias in query.column_aliases() {
        mixer.mix_str(alias);
    }
    mixer.mix_bytes(&[query.is_inheritance_query() as u8]);
    mixer.mix_bytes(&[query.limit_option().unwrap_or(0)]);
    mixer.mix_u32(query.grouping_levels_up());
    if let Some(name) = query.xml_element_name() {
        mixer.mix_str(name);
    }
    if let Some(collation) = query.parameter_collation() {
        mixer.mix_u32(collation);
    }

    WalkOutcome::Cacheable {
        const_id: mixer.finish(),
        num_const: constants.len() as u32,
    }
}
