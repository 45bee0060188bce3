//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// Drivers normalize every backend-native failure into one of these at the
/// driver boundary; the facade never lets any of them escape to application
/// code.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend not usable at probe time (missing directory, unreachable
    /// server, unsupported filesystem feature).
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// A single operation failed (disk full, network blip, lock timeout).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration or malformed input for this driver
    /// (e.g. an empty tag path segment).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend-native protocol failure.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Redis-specific error.
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] keel_redis::RedisError),

    /// SQLite-specific error.
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Memcached-specific error.
    #[cfg(feature = "memcached")]
    #[error("Memcached error: {0}")]
    Memcached(#[from] memcache::MemcacheError),

    /// Generic error.
    #[error("Cache error: {0}")]
    Other(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(keel_redis::RedisError::Redis(err))
    }
}

#[cfg(feature = "redis")]
use keel_redis::redis;
