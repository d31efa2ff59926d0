//! Configuration schema for cache-to-disk
//!
//! Configuration is read from `~/.config/cache_to_disk/config.toml`

use crate::cache::retention::DEFAULT_CACHE_AGE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Disk cache settings
    pub cache: CacheConfig,
}

/// Disk cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Base directory for artifacts; `DISK_CACHE_DIR` takes precedence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Retention used by `cached_default`, in days (0 = never expire)
    pub default_days: u32,

    /// Sweep expired artifacts when the registry is opened
    pub sweep_on_open: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            default_days: DEFAULT_CACHE_AGE,
            sweep_on_open: true,
        }
    }
}
