//! Configuration management for cache-to-disk
//!
//! The base directory resolves in this order:
//!
//! 1. `DISK_CACHE_DIR` environment variable
//! 2. `[cache] dir` in the config file
//! 3. `<platform cache dir>/cache_to_disk`
//!
//! `~` and `$VAR` / `${VAR}` references are expanded in the first two.

pub mod schema;

pub use schema::{CacheConfig, Config};

use crate::error::{CacheError, CacheResult};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the base cache directory
pub const CACHE_DIR_ENV: &str = "DISK_CACHE_DIR";

/// Directory name used under the platform cache and config dirs
const APP_DIR: &str = "cache_to_disk";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Get the platform default cache directory
    pub fn default_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join(APP_DIR))
    }

    /// Load configuration, using defaults if the file does not exist
    pub fn load(&self) -> CacheResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(&self, path: &Path) -> CacheResult<Config> {
        let content = fs::read_to_string(path)
            .map_err(|e| CacheError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| CacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Resolve the base cache directory for `config`
    pub fn resolve_cache_dir(config: &Config) -> CacheResult<PathBuf> {
        if let Some(dir) = env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            let dir = expand_path(&dir.to_string_lossy());
            debug!("Using {}={}", CACHE_DIR_ENV, dir.display());
            return Ok(dir);
        }

        if let Some(ref dir) = config.cache.dir {
            return Ok(expand_path(&dir.to_string_lossy()));
        }

        Self::default_cache_dir().ok_or(CacheError::NoCacheDir)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand a leading `~` and any `$VAR` / `${VAR}` references
///
/// Unset variables are left as written.
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = expand_vars(raw);

    let home_relative = expanded
        .strip_prefix("~/")
        .or_else(|| (expanded == "~").then_some(""));
    match (home_relative, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(expanded),
    }
}

fn expand_vars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        let value = if name.is_empty() { None } else { env::var(name).ok() };
        match value {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}
