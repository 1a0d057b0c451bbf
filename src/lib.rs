// Process-wide cache of generic query plans shared across database
// worker processes.

pub mod arbitration;
pub mod arena;
pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod fingerprint;
pub mod host;
pub mod introspect;
pub mod invalidate;
pub mod rdepend;
pub mod store;
pub mod walker;

pub use cache::{InsertOutcome, LockWindow, PlanCache, PlanRequestOutcome};
pub use config::{PlanCacheConfig, PlanCacheConfigBuilder};
pub use error::{PlanCacheError, Result};
pub use fingerprint::{Fingerprint, InvalItem, ObjectClass, RdependKey};
