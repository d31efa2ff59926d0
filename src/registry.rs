//! Process-wide cache registry
//!
//! A `CacheRegistry` is created once at startup and shared by `Arc` with
//! every cached function. Opening it prepares the cache directory and runs
//! the expiry sweep exactly once; afterwards, expired artifacts are only
//! removed by an explicit [`CacheRegistry::delete_old_disk_caches`] call.

use crate::cache::accounting::{Accounting, CacheInfo};
use crate::cache::decorator::CachedFn;
use crate::cache::fingerprint::FunctionId;
use crate::cache::retention::RetentionPolicy;
use crate::cache::store::ArtifactStore;
use crate::cache::sweep::{sweep, SweepReport};
use crate::config::{Config, ConfigManager};
use crate::error::CacheResult;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Owner of the artifact store and of every cached function's counters
#[derive(Debug)]
pub struct CacheRegistry {
    store: ArtifactStore,
    default_retention: RetentionPolicy,
    accounting: Mutex<BTreeMap<FunctionId, Arc<Accounting>>>,
    opening_sweep: Option<SweepReport>,
}

impl CacheRegistry {
    /// Open the registry described by `config`
    pub fn open(config: &Config) -> CacheResult<Arc<Self>> {
        let dir = ConfigManager::resolve_cache_dir(config)?;
        Self::open_with(dir, config)
    }

    /// Open a registry on `dir` with default settings, ignoring `DISK_CACHE_DIR`
    pub fn open_at(dir: impl Into<PathBuf>) -> CacheResult<Arc<Self>> {
        Self::open_with(dir.into(), &Config::default())
    }

    /// Open the registry from the default config file and environment
    pub fn from_env() -> CacheResult<Arc<Self>> {
        let config = ConfigManager::new().load()?;
        Self::open(&config)
    }

    /// Open a registry on `dir` with the remaining settings from `config`
    pub fn open_with(dir: PathBuf, config: &Config) -> CacheResult<Arc<Self>> {
        let store = ArtifactStore::open(dir)?;

        let opening_sweep = if config.cache.sweep_on_open {
            let report = sweep(&store, Utc::now())?;
            if report.deleted > 0 || report.failed > 0 {
                info!("Expired disk caches in {}: {}", store.root().display(), report);
            }
            Some(report)
        } else {
            None
        };

        Ok(Arc::new(Self {
            store,
            default_retention: RetentionPolicy::days(config.cache.default_days),
            accounting: Mutex::new(BTreeMap::new()),
            opening_sweep,
        }))
    }

    /// Wrap `func` so its results persist for `n_days_to_cache` days
    ///
    /// `UNLIMITED_CACHE_AGE` (0) keeps results until they are explicitly
    /// deleted. Wrappers for the same function share one set of counters.
    pub fn cached<F>(
        self: &Arc<Self>,
        function: FunctionId,
        n_days_to_cache: u32,
        func: F,
    ) -> CachedFn<F> {
        let retention = RetentionPolicy::days(n_days_to_cache);
        if retention.is_unlimited() {
            warn!("Using an unlimited age cache for {} is not recommended", function);
        }
        let accounting = self.accounting_for(&function);
        debug!("Caching {} to disk ({})", function, retention);
        CachedFn::new(Arc::clone(self), function, retention, accounting, func)
    }

    /// Wrap `func` with the configured default retention
    pub fn cached_default<F>(self: &Arc<Self>, function: FunctionId, func: F) -> CachedFn<F> {
        self.cached(function, self.default_retention.n_days(), func)
    }

    /// Remove every persisted result of `function`; returns how many were removed
    pub fn delete_disk_caches_for_function(&self, function: &FunctionId) -> CacheResult<usize> {
        debug!("Removing cache entries for {}", function);
        let removed = self.store.delete_all_for_function(function)?;
        debug!("Removed {} cache entries for {}", removed, function);
        Ok(removed)
    }

    /// Sweep expired artifacts now
    pub fn delete_old_disk_caches(&self) -> CacheResult<SweepReport> {
        sweep(&self.store, Utc::now())
    }

    /// Counters of one function, if it has been wrapped in this registry
    pub fn cache_info(&self, function: &FunctionId) -> Option<CacheInfo> {
        self.table().get(function).map(|acc| acc.snapshot())
    }

    /// Counters of every function wrapped in this registry, by qualified name
    pub fn accounting(&self) -> BTreeMap<String, CacheInfo> {
        self.table()
            .iter()
            .map(|(function, acc)| (function.qualified(), acc.snapshot()))
            .collect()
    }

    /// Result of the sweep run when the registry was opened
    pub fn opening_sweep(&self) -> Option<SweepReport> {
        self.opening_sweep
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn default_retention(&self) -> RetentionPolicy {
        self.default_retention
    }

    fn accounting_for(&self, function: &FunctionId) -> Arc<Accounting> {
        Arc::clone(self.table().entry(function.clone()).or_default())
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<FunctionId, Arc<Accounting>>> {
        // counters stay consistent even if a holder panicked
        self.accounting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
