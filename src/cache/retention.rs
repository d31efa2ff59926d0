//! Retention windows for persisted artifacts

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of days a result stays on disk
pub const DEFAULT_CACHE_AGE: u32 = 7;

/// Special age meaning "never expire"
pub const UNLIMITED_CACHE_AGE: u32 = 0;

/// How long an artifact stays valid, in whole days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionPolicy {
    days: u32,
}

impl RetentionPolicy {
    /// Retain for `days` days; `UNLIMITED_CACHE_AGE` keeps artifacts forever
    pub const fn days(days: u32) -> Self {
        Self { days }
    }

    pub const fn unlimited() -> Self {
        Self::days(UNLIMITED_CACHE_AGE)
    }

    pub fn n_days(&self) -> u32 {
        self.days
    }

    pub fn is_unlimited(&self) -> bool {
        self.days == UNLIMITED_CACHE_AGE
    }

    /// Check whether an artifact created at `created_at` is stale at `now`
    ///
    /// The window is exclusive: an artifact exactly `days` old is kept.
    pub fn is_stale(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.is_unlimited() {
            return false;
        }
        now - created_at > Duration::days(i64::from(self.days))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::days(DEFAULT_CACHE_AGE)
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            write!(f, "unlimited")
        } else {
            write!(f, "{}d", self.days)
        }
    }
}
