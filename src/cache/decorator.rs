//! Invocation interception for cached functions
//!
//! A [`CachedFn`] wraps a function and answers calls from disk when it can.
//! The wrapped function returns a [`CacheOutcome`]: `Ok(value)` is persisted,
//! `Err(NoCacheCondition(value).into())` is handed back without persisting,
//! and `Err(Uncacheable::Failed(e))` surfaces as [`CallError::Function`].
//!
//! ```no_run
//! use cache_to_disk::{function_id, CacheOutcome, CacheRegistry, NoCacheCondition};
//!
//! # fn main() -> cache_to_disk::CacheResult<()> {
//! let registry = CacheRegistry::from_env()?;
//! let fetch = registry.cached(function_id!(fetch), 7, |host: &String| -> CacheOutcome<Vec<u8>> {
//!     let (body, complete) = (host.as_bytes().to_vec(), false);
//!     if !complete {
//!         // partial body: still useful to the caller, not worth keeping
//!         return Err(NoCacheCondition(body).into());
//!     }
//!     Ok(body)
//! });
//! let _body = fetch.call(&"example.com".to_string());
//! println!("{}", fetch.cache_info());
//! # Ok(())
//! # }
//! ```

use crate::cache::accounting::{Accounting, CacheInfo};
use crate::cache::fingerprint::{compute_key, CacheKey, FunctionId};
use crate::cache::retention::RetentionPolicy;
use crate::cache::store::ArtifactMeta;
use crate::error::{CacheResult, CallError};
use crate::registry::CacheRegistry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signal from a wrapped function: return this value, but don't persist it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoCacheCondition<T>(pub T);

impl<T> NoCacheCondition<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// The non-persisting outcomes of a wrapped function
#[derive(Debug)]
pub enum Uncacheable<T, E> {
    /// A valid result that must not be cached
    NoCache(NoCacheCondition<T>),
    /// A genuine failure, propagated to the caller unchanged
    Failed(E),
}

impl<T, E> Uncacheable<T, E> {
    pub fn no_cache(value: T) -> Self {
        Self::NoCache(NoCacheCondition(value))
    }

    pub fn failed(err: E) -> Self {
        Self::Failed(err)
    }
}

impl<T, E> From<NoCacheCondition<T>> for Uncacheable<T, E> {
    fn from(signal: NoCacheCondition<T>) -> Self {
        Self::NoCache(signal)
    }
}

/// Return type of a function wrapped by [`CachedFn`]
pub type CacheOutcome<T, E = Infallible> = Result<T, Uncacheable<T, E>>;

/// What one execution of the wrapped function produced
enum Invocation<T, E> {
    Cached(T),
    Uncached(T),
    Failed(E),
}

impl<T, E> From<CacheOutcome<T, E>> for Invocation<T, E> {
    fn from(outcome: CacheOutcome<T, E>) -> Self {
        match outcome {
            Ok(value) => Self::Cached(value),
            Err(Uncacheable::NoCache(NoCacheCondition(value))) => Self::Uncached(value),
            Err(Uncacheable::Failed(e)) => Self::Failed(e),
        }
    }
}

/// A function whose results are persisted to disk
///
/// Built by [`CacheRegistry::cached`]. Cloning is not needed to share it:
/// it is `Sync` whenever the wrapped function is.
pub struct CachedFn<F> {
    function: FunctionId,
    retention: RetentionPolicy,
    accounting: Arc<Accounting>,
    registry: Arc<CacheRegistry>,
    func: F,
}

impl<F> CachedFn<F> {
    pub(crate) fn new(
        registry: Arc<CacheRegistry>,
        function: FunctionId,
        retention: RetentionPolicy,
        accounting: Arc<Accounting>,
        func: F,
    ) -> Self {
        Self {
            function,
            retention,
            accounting,
            registry,
            func,
        }
    }

    /// Call with positional arguments (a tuple for several)
    pub fn call<A, T, E>(&self, args: &A) -> Result<T, CallError<E>>
    where
        F: Fn(&A) -> CacheOutcome<T, E>,
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
    {
        let key = compute_key(&self.function, self.retention, args, &());
        self.intercept(key, || (self.func)(args))
    }

    /// Call with positional and keyword arguments
    ///
    /// `kwargs` must serialize to a map; the order its entries were inserted
    /// in does not affect the cache key.
    pub fn call_with<A, K, T, E>(&self, args: &A, kwargs: &K) -> Result<T, CallError<E>>
    where
        F: Fn(&A, &K) -> CacheOutcome<T, E>,
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
    {
        let key = compute_key(&self.function, self.retention, args, kwargs);
        self.intercept(key, || (self.func)(args, kwargs))
    }

    fn intercept<T, E>(
        &self,
        key: CacheResult<CacheKey>,
        run: impl FnOnce() -> CacheOutcome<T, E>,
    ) -> Result<T, CallError<E>>
    where
        T: Serialize + DeserializeOwned,
    {
        let key = match key {
            Ok(key) => key,
            Err(e) => {
                warn!("{}; calling {} without the disk cache", e, self.function);
                return self.bypass(run);
            }
        };

        let store = self.registry.store();
        if let Some(artifact) = store.get::<T>(&self.function, &key) {
            self.accounting.record_hit();
            debug!("Cache HIT on {} ({})", self.function, self.accounting.snapshot());
            return Ok(artifact.value);
        }

        debug!(
            "Cache MISS on {} ({}), key {}",
            self.function,
            self.accounting.snapshot(),
            key
        );

        match Invocation::from(run()) {
            Invocation::Cached(value) => {
                self.accounting.record_miss();
                store.put(&self.function, &key, self.retention, &value)?;
                debug!("{}() returned, added cache entry", self.function);
                Ok(value)
            }
            Invocation::Uncached(value) => {
                self.accounting.record_nocache();
                debug!("{}() raised NoCacheCondition; no new cache entry", self.function);
                Ok(value)
            }
            Invocation::Failed(e) => Err(CallError::Function(e)),
        }
    }

    /// Run without touching the store; used when no key can be derived
    fn bypass<T, E>(&self, run: impl FnOnce() -> CacheOutcome<T, E>) -> Result<T, CallError<E>> {
        match Invocation::from(run()) {
            Invocation::Cached(value) => {
                self.accounting.record_miss();
                Ok(value)
            }
            Invocation::Uncached(value) => {
                self.accounting.record_nocache();
                Ok(value)
            }
            Invocation::Failed(e) => Err(CallError::Function(e)),
        }
    }

    /// Current hit/miss/nocache counters
    pub fn cache_info(&self) -> CacheInfo {
        self.accounting.snapshot()
    }

    /// Delete every persisted result of this function, readable or not
    pub fn cache_clear(&self) -> CacheResult<usize> {
        let removed = self.registry.delete_disk_caches_for_function(&self.function)?;
        info!("Cache cleared for {}(); {} items removed", self.function, removed);
        Ok(removed)
    }

    /// Number of results currently persisted for this function
    pub fn cache_size(&self) -> CacheResult<usize> {
        Ok(self.cache_entries()?.len())
    }

    /// Metadata of every result persisted for this function, oldest first
    pub fn cache_entries(&self) -> CacheResult<Vec<ArtifactMeta>> {
        self.registry.store().list_for_function(&self.function)
    }

    pub fn function(&self) -> &FunctionId {
        &self.function
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }
}

impl<F> fmt::Debug for CachedFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFn")
            .field("function", &self.function)
            .field("retention", &self.retention)
            .field("info", &self.accounting.snapshot())
            .finish_non_exhaustive()
    }
}
