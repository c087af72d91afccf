//! Error types for the lock-free TTL cache.
//!
//! Almost nothing in the cache is an error: misses, expired entries and lost
//! compare-and-swap races are all normal results. What remains is invalid
//! configuration (fatal at construction) and failing to start the
//! background evictor thread.

use std::fmt;
use std::io;

/// The main error type for cache operations.
#[derive(Debug)]
pub enum CacheError {
    /// A configuration value is out of range.
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    /// An I/O error occurred (spawning the evictor thread).
    IoError(io::Error),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidConfig { field, reason } => {
                write!(f, "invalid config: {}: {}", field, reason)
            }
            CacheError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        CacheError::IoError(err)
    }
}

/// A specialized Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
