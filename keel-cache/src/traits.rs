//! Driver trait definitions.

use crate::error::CacheResult;
use async_trait::async_trait;

/// Identifies a concrete backend driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Plain filesystem store.
    File,
    /// Filesystem store with symlink tag index.
    AdvancedFile,
    /// Embedded SQLite store.
    Sqlite,
    /// Single-node Redis.
    Redis,
    /// Clustered Redis.
    RedisCluster,
    /// Memcache daemon (ascii protocol client).
    Memcache,
    /// Memcache daemon (binary protocol client).
    Memcached,
    /// In-process memory store.
    Apc,
    /// Disabled cache placeholder.
    Session,
}

impl DriverKind {
    /// Stable identifier used in configuration and the journal key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::AdvancedFile => "advancedfile",
            Self::Sqlite => "sqlite",
            Self::Redis => "redis",
            Self::RedisCluster => "redis-cluster",
            Self::Memcache => "memcache",
            Self::Memcached => "memcached",
            Self::Apc => "apc",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved bookkeeping key for a driver.
///
/// The journal key never carries a TTL, is excluded from expiry scans, and
/// never sees ordinary `get`/`set` application traffic.
pub fn journal_key(kind: DriverKind) -> String {
    format!("{}_journal", kind.as_str())
}

/// Partial statistics snapshot.
///
/// Every field is optional because not every backend can report every
/// metric: a plain file cache has no hit counters, Memcached cannot report
/// entry TTLs, and so on.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    /// Number of live entries.
    pub entries: Option<u64>,
    /// Backend-reported cache hits.
    pub hits: Option<u64>,
    /// Backend-reported cache misses.
    pub misses: Option<u64>,
    /// Backend-reported insert count.
    pub inserts: Option<u64>,
    /// Approximate memory/disk footprint in bytes.
    pub mem_bytes: Option<u64>,
    /// Per-node raw stats for clustered backends, one delimited string per
    /// node. Deliberately not aggregated: nodes may have wildly different
    /// uptimes, so averaging would mislead.
    pub per_node: Vec<String>,
}

/// Entry lifetime in seconds.
///
/// `0` means the entry never expires, a negative value means "store but do
/// not attach any expiration metadata" (used for housekeeping keys), and a
/// positive value is seconds-to-live from write time.
pub type Lifetime = i64;

/// Low-level store contract implemented by every backend driver.
///
/// Values are opaque serialized payloads (JSON strings); the facade is the
/// only layer that (de)serializes typed values.
#[async_trait]
pub trait CacheDriver: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> DriverKind;

    /// Cheap availability check: directory writable, server reachable.
    async fn probe(&self) -> bool;

    /// Write+read+delete round trip (plus a symlink round trip where
    /// relevant). A driver failing its self test must be treated as
    /// unavailable, not used in degraded form.
    async fn self_test(&self) -> bool {
        let key = "__keel_selftest__";
        let stored = matches!(
            self.store(key, "\"selftest\"".to_string(), 60).await,
            Ok(true)
        );
        let loaded = matches!(self.load(key).await, Ok(Some(ref v)) if v == "\"selftest\"");
        let deleted = self.delete(key).await.is_ok();
        stored && loaded && deleted
    }

    /// Store a serialized value under `key`.
    async fn store(&self, key: &str, value: String, ttl: Lifetime) -> CacheResult<bool>;

    /// Load the value for `key`, if present and live. Stale entries are
    /// lazily destroyed where the medium requires it.
    async fn load(&self, key: &str) -> CacheResult<Option<String>>;

    /// Delete one entry. `Ok(false)` when the key did not exist.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every entry this driver owns.
    async fn delete_all(&self) -> CacheResult<bool>;

    /// Partial statistics for this backend.
    async fn stats(&self) -> CacheResult<StatsSnapshot>;

    /// Load several keys. The result has the same length and order as
    /// `keys`; drivers with a native batched fetch override this.
    async fn load_multi(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.load(key).await?);
        }
        Ok(out)
    }

    /// Whether `key` currently holds a live entry. Drivers without a native
    /// existence check fall back to `load` semantics.
    async fn key_exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.load(key).await?.is_some())
    }
}

/// Tag index contract for drivers that support group invalidation.
///
/// Deliberately a separate trait: the memcache drivers have no tag support
/// at all, and that absence is visible in the type system instead of being
/// papered over with runtime no-ops.
#[async_trait]
pub trait TagIndex: Send + Sync {
    /// Associate `key` with each tag. Returns `Ok(true)` only when every
    /// tag was applied; a failing tag does not stop the remaining ones from
    /// being attempted.
    async fn tag_key(&self, tags: &[&str], key: &str) -> CacheResult<bool>;

    /// Destroy every entry carrying any of `tags`, along with the tags' own
    /// index structures. Idempotent: unknown tags contribute zero.
    ///
    /// The returned count is driver-specific legacy behavior: the symlink
    /// index counts deleted entry files, the Redis drivers count the tags
    /// passed in, and the SQLite driver always returns zero.
    async fn flush_by_tags(&self, tags: &[&str]) -> CacheResult<u64>;

    /// Collect the distinct entry keys carrying any of `tags`.
    async fn keys_by_tags(&self, tags: &[&str]) -> CacheResult<Vec<String>>;

    /// Post-flush index cleanup hook. A no-op for drivers whose index is
    /// destroyed inline by `flush_by_tags`.
    async fn clear_tags(&self, tags: &[&str]) -> CacheResult<()>;
}
