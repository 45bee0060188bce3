//! Backend driver implementations.

pub mod file;
pub mod memory;
pub mod noop;
pub mod tagged_file;

#[cfg(feature = "memcached")]
pub mod memcached;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "redis")]
pub mod redis_cluster;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::FileDriver;
pub use memory::MemoryDriver;
pub use noop::NoopDriver;
pub use tagged_file::TaggedFileDriver;

#[cfg(feature = "memcached")]
pub use memcached::{MAX_DAEMON_TTL, MemcachedDriver};
#[cfg(feature = "redis")]
pub use redis::RedisDriver;
#[cfg(feature = "redis")]
pub use redis_cluster::RedisClusterDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;
