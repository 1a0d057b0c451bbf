// Runtime configuration for the plan cache.
//
// Everything except `max_entries` is reloadable after startup; the
// reloadable fields live behind atomics inside `PlanCacheConfig` itself so
// a host can swap them without taking the store's lock.

use crate::error::{PlanCacheError, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Minimum allowed value for `max_entries`.
pub const MIN_MAX_ENTRIES: u32 = 5;

/// Upper bound on `threshold`.
pub const MAX_THRESHOLD: u32 = 5;

/// Default number of custom-plan samples before arbitration kicks in.
pub const DEFAULT_THRESHOLD: u32 = 4;

/// Default max fingerprints tracked per reverse-dependency key.
pub const DEFAULT_RDEPEND_MAX: u32 = 50;

/// Default minimum planning time, in milliseconds, below which a plan is
/// not worth caching.
pub const DEFAULT_MIN_PLAN_TIME_MS: u32 = 10;

/// Default max entries held in the store.
pub const DEFAULT_MAX_ENTRIES: u32 = 100;

/// Plan cache configuration.
///
/// Constructed once at startup with [`PlanCacheConfig::new`], which
/// validates bounds. The reloadable knobs are exposed as atomic getters and
/// setters so a host can flip them mid-session.
#[derive(Debug)]
pub struct PlanCacheConfig {
    enabled: AtomicBool,
    max_entries: u32,
    min_plan_time_ms: AtomicU32,
    read_only: AtomicBool,
    threshold: AtomicU32,
    rdepend_max: AtomicU32,
    disable_plan_cache: AtomicBool,
    explain_costs: AtomicBool,
    explain_format: AtomicBool,
    explain_verbose: AtomicBool,
}

/// The subset of [`PlanCacheConfig`] that can only be set at construction.
#[derive(Debug, Clone, Copy)]
pub struct PlanCacheConfigBuilder {
    pub enabled: bool,
    pub max_entries: u32,
    pub min_plan_time_ms: u32,
    pub read_only: bool,
    pub threshold: u32,
    pub rdepend_max: u32,
    pub disable_plan_cache: bool,
    pub explain_costs: bool,
    pub explain_format: bool,
    pub explain_verbose: bool,
}

impl Default for PlanCacheConfigBuilder {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            min_plan_time_ms: DEFAULT_MIN_PLAN_TIME_MS,
            read_only: false,
            threshold: DEFAULT_THRESHOLD,
            rdepend_max: DEFAULT_RDEPEND_MAX,
            disable_plan_cache: false,
            explain_costs: false,
            explain_format: false,
            explain_verbose: false,
        }
    }
}

impl PlanCacheConfigBuilder {
    /// Validate bounds without constructing the atomics-backed config yet.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries < MIN_MAX_ENTRIES {
            return Err(PlanCacheError::Configuration(format!(
                "max_entries must be at least {MIN_MAX_ENTRIES}"
            )));
        }
        if self.threshold == 0 || self.threshold > MAX_THRESHOLD {
            return Err(PlanCacheError::Configuration(format!(
                "threshold must be between 1 and {MAX_THRESHOLD}"
            )));
        }
        if self.rdepend_max == 0 {
            return Err(PlanCacheError::Configuration(
                "rdepend_max must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(self) -> Result<PlanCacheConfig> {
        self.validate()?;
        Ok(PlanCacheConfig {
            enabled: AtomicBool::new(self.enabled),
            max_entries: self.max_entries,
            min_plan_time_ms: AtomicU32::new(self.min_plan_time_ms),
            read_only: AtomicBool::new(self.read_only),
            threshold: AtomicU32::new(self.threshold),
            rdepend_max: AtomicU32::new(self.rdepend_max),
            disable_plan_cache: AtomicBool::new(self.disable_plan_cache),
            explain_costs: AtomicBool::new(self.explain_costs),
            explain_format: AtomicBool::new(self.explain_format),
            explain_verbose: AtomicBool::new(self.explain_verbose),
        })
    }
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        PlanCacheConfigBuilder::default()
            .build()
            .expect("default configuration is always valid")
    }
}

impl PlanCacheConfig {
    pub fn new(builder: PlanCacheConfigBuilder) -> Result<Self> {
        builder.build()
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, value: bool) {
        self.enabled.store(value, Ordering::Relaxed);
    }

    /// Immutable after construction: the store's backing arena and hash map
    /// are sized from this value once.
    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    pub fn min_plan_time_ms(&self) -> u32 {
        self.min_plan_time_ms.load(Ordering::Relaxed)
    }

    pub fn set_min_plan_time_ms(&self, value: u32) {
        self.min_plan_time_ms.store(value, Ordering::Relaxed);
    }

    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    pub fn set_read_only(&self, value: bool) {
        self.read_only.store(value, Ordering::Relaxed);
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, value: u32) -> Result<()> {
        if value == 0 || value > MAX_THRESHOLD {
            return Err(PlanCacheError::Configuration(format!(
                "threshold must be between 1 and {MAX_THRESHOLD}"
            )));
        }
        self.threshold.store(value, Ordering::Relaxed);
        Ok(())
    }

    pub fn rdepend_max(&self) -> u32 {
        self.rdepend_max.load(Ordering::Relaxed)
    }

    pub fn disable_plan_cache(&self) -> bool {
        self.disable_plan_cache.load(Ordering::Relaxed)
    }

    pub fn set_disable_plan_cache(&self, value: bool) {
        self.disable_plan_cache.store(value, Ordering::Relaxed);
    }

    pub fn explain_costs(&self) -> bool {
        self.explain_costs.load(Ordering::Relaxed)
    }

    /// Whether the host's EXPLAIN formatter should render machine-readable
    /// output (e.g. JSON) instead of plain text. Opaque to this crate: it
    /// has no effect on caching behavior, only on what a host reads back
    /// when formatting a cached plan for display.
    pub fn explain_format(&self) -> bool {
        self.explain_format.load(Ordering::Relaxed)
    }

    pub fn explain_verbose(&self) -> bool {
        self.explain_verbose.load(Ordering::Relaxed)
    }
}
