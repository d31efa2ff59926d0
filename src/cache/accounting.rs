//! Runtime hit/miss/nocache accounting

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a function's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    /// Calls answered from disk
    pub hits: u64,
    /// Calls that ran the function and (tried to) persist its result
    pub misses: u64,
    /// Calls that ran the function but were told not to persist
    pub nocache: u64,
}

impl CacheInfo {
    /// Total number of counted calls
    pub fn calls(&self) -> u64 {
        self.hits + self.misses + self.nocache
    }

    /// Fraction of counted calls served from disk
    pub fn hit_rate(&self) -> f64 {
        match self.calls() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

impl fmt::Display for CacheInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheInfo(hits={}, misses={}, nocache={})",
            self.hits, self.misses, self.nocache
        )
    }
}

/// Monotonic counters for one cached function
///
/// Lives as long as the registry that created it; only a restart resets it.
#[derive(Debug, Default)]
pub struct Accounting {
    hits: AtomicU64,
    misses: AtomicU64,
    nocache: AtomicU64,
}

impl Accounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_nocache(&self) {
        self.nocache.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheInfo {
        CacheInfo {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            nocache: self.nocache.load(Ordering::Relaxed),
        }
    }
}
