use thiserror::Error;

/// Errors surfaced by the plan cache's public API.
///
/// The cache is advisory: arena exhaustion, a saturated
/// reverse-dependency entry, a full store, a non-cacheable query, and a
/// corrupt stored plan are never represented here — those paths fall
/// through to "let the host plan normally" and are only observable through
/// `tracing` events and introspection counters. `PlanCacheError` is
/// reserved for mistakes a caller can actually act on: a rejected
/// configuration, or misuse of the API contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanCacheError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("reset filter must zero all fields or name a specific query")]
    InvalidResetFilter,
}

pub type Result<T> = std::result::Result<T, PlanCacheError>;
