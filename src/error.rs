//! Error types for cache-to-disk
//!
//! Registry, store and configuration operations return `CacheResult<T>`.
//! Calls through a wrapped function return `Result<T, CallError<E>>`, where
//! `E` is the wrapped function's own error type.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// All errors raised by the cache itself
#[derive(Error, Debug)]
pub enum CacheError {
    // Fingerprinting errors
    #[error("Cannot derive cache key for {function}: {reason}")]
    KeyDerivation { function: String, reason: String },

    #[error("Invalid function name: {0:?}")]
    InvalidFunctionName(String),

    // Storage errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode result of {function}: {reason}")]
    Encode { function: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("No cache directory could be determined for this platform")]
    NoCacheDir,
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a key derivation error for a function
    pub fn key_derivation(function: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::KeyDerivation {
            function: function.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures of the persistence layer (write path or directory access)
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Encode { .. })
    }

    /// True when the call arguments could not be fingerprinted
    pub fn is_key_derivation(&self) -> bool {
        matches!(self, Self::KeyDerivation { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoCacheDir => Some("Set DISK_CACHE_DIR to a writable directory"),
            Self::KeyDerivation { .. } => {
                Some("Use argument types that serialize to JSON with string map keys")
            }
            _ => None,
        }
    }
}

/// Error returned by a call through a wrapped function
#[derive(Debug)]
pub enum CallError<E> {
    /// The wrapped function itself failed; passed through unchanged
    Function(E),

    /// The result was computed but could not be persisted
    Storage(CacheError),
}

impl<E> CallError<E> {
    /// The wrapped function's error, if that is what failed
    pub fn into_function_error(self) -> Option<E> {
        match self {
            Self::Function(e) => Some(e),
            Self::Storage(_) => None,
        }
    }

    /// The cache error, if persistence failed
    pub fn storage_error(&self) -> Option<&CacheError> {
        match self {
            Self::Function(_) => None,
            Self::Storage(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(e) => write!(f, "{}", e),
            Self::Storage(e) => write!(f, "Result computed but not cached: {}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Function(_) => None,
            Self::Storage(e) => Some(e),
        }
    }
}

impl<E> From<CacheError> for CallError<E> {
    fn from(err: CacheError) -> Self {
        Self::Storage(err)
    }
}
