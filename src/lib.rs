//! cache-to-disk - Persist function results on local disk
//!
//! Wraps expensive functions so repeated calls with the same arguments are
//! answered from disk, with per-function retention windows and runtime
//! hit/miss accounting.

pub mod cache;
pub mod config;
pub mod error;
pub mod registry;

pub use cache::{
    CacheInfo, CacheKey, CacheOutcome, CachedFn, FunctionId, NoCacheCondition, RetentionPolicy,
    SweepReport, Uncacheable, DEFAULT_CACHE_AGE, UNLIMITED_CACHE_AGE,
};
pub use error::{CacheError, CacheResult, CallError};
pub use registry::CacheRegistry;
