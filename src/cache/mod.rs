//! Persistent function-result cache
//!
//! Results are content-addressed by a fingerprint of the function identity
//! and its call arguments, stored one file per call, and expired by age.
//!
//! # Call Flow
//!
//! | Step | Outcome | Counter |
//! |------|---------|---------|
//! | Key cannot be derived | function runs, nothing stored | misses |
//! | Artifact found | stored value returned | hits |
//! | Function returns `Ok` | value stored and returned | misses |
//! | Function raises `NoCacheCondition` | value returned, not stored | nocache |
//! | Function fails | error returned unchanged | none |

pub mod accounting;
mod canonical;
pub mod decorator;
pub mod fingerprint;
pub mod retention;
pub mod store;
pub mod sweep;

pub use accounting::{Accounting, CacheInfo};
pub use decorator::{CacheOutcome, CachedFn, NoCacheCondition, Uncacheable};
pub use fingerprint::{compute_key, CacheKey, FunctionId};
pub use retention::{RetentionPolicy, DEFAULT_CACHE_AGE, UNLIMITED_CACHE_AGE};
pub use store::{Artifact, ArtifactEntry, ArtifactMeta, ArtifactStore};
pub use sweep::{sweep, SweepReport};
