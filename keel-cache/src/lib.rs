//! # Keel Cache
//!
//! Tagged, multi-backend caching for Keel services.
//!
//! One configuration-selected backend serves all cache traffic behind the
//! [`Cache`] facade: filesystem (plain or with a symlink tag index),
//! embedded SQLite, single-node or clustered Redis, memcache daemons, an
//! in-process memory store, or a no-op driver when caching is disabled.
//!
//! The facade is fail-open by contract: a missing, broken or misconfigured
//! backend degrades into cache misses and refused writes. Application code
//! never handles cache errors.
//!
//! ## Features
//!
//! - `redis` (default): single-node and clustered Redis backends
//! - `sqlite` (default): embedded SQLite backend
//! - `memcached` (default): memcache daemon backends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel_cache::{Cache, CacheConfig};
//!
//! let cache = Cache::connect(
//!     CacheConfig::advanced_file("./cache").with_prefix("shop."),
//! )
//! .await;
//!
//! cache.set("p42", &product, None).await;
//! cache.set_cache_tag(&["cat_5"], "p42").await;
//!
//! // Later, invalidate everything in category 5 at once.
//! cache.flush_tags(&["cat_5"]).await;
//! ```

pub mod config;
pub mod drivers;
pub mod error;
pub mod facade;
pub mod traits;

pub use config::{CacheConfig, CacheMethod};
pub use error::{CacheError, CacheResult};
pub use facade::Cache;
pub use traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot, TagIndex, journal_key};

#[cfg(feature = "redis")]
pub use keel_redis::{ClusterStrategy, RedisConfig};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{CacheConfig, CacheMethod};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::facade::Cache;
    pub use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot, TagIndex};

    #[cfg(feature = "redis")]
    pub use keel_redis::{ClusterStrategy, RedisConfig};
}
