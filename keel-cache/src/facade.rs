//! High-level cache facade.
//!
//! The facade is the only layer application code talks to. It owns driver
//! selection, key prefixing, typed (de)serialization, default lifetimes and
//! hit/miss bookkeeping, and it is fail-open throughout: a broken backend
//! degrades into misses and refused writes, never into application errors.

use crate::config::{CacheConfig, CacheMethod};
use crate::drivers::{FileDriver, MemoryDriver, NoopDriver, TaggedFileDriver};
use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot, TagIndex, journal_key};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[cfg(feature = "memcached")]
use crate::drivers::MemcachedDriver;
#[cfg(feature = "redis")]
use crate::drivers::{RedisClusterDriver, RedisDriver};
#[cfg(feature = "sqlite")]
use crate::drivers::SqliteDriver;

enum ActiveDriver {
    File(FileDriver),
    AdvancedFile(TaggedFileDriver),
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteDriver),
    #[cfg(feature = "redis")]
    Redis(RedisDriver),
    #[cfg(feature = "redis")]
    RedisCluster(RedisClusterDriver),
    #[cfg(feature = "memcached")]
    Memcached(MemcachedDriver),
    Memory(MemoryDriver),
    Noop(NoopDriver),
}

impl ActiveDriver {
    fn as_store(&self) -> &dyn CacheDriver {
        match self {
            Self::File(d) => d,
            Self::AdvancedFile(d) => d,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(d) => d,
            #[cfg(feature = "redis")]
            Self::Redis(d) => d,
            #[cfg(feature = "redis")]
            Self::RedisCluster(d) => d,
            #[cfg(feature = "memcached")]
            Self::Memcached(d) => d,
            Self::Memory(d) => d,
            Self::Noop(d) => d,
        }
    }

    /// The tag index, for backends that have one. The daemon-backed and
    /// in-process backends have no index; the plain file driver exposes one
    /// that accepts and ignores tag calls.
    fn tags(&self) -> Option<&dyn TagIndex> {
        match self {
            Self::File(d) => Some(d),
            Self::AdvancedFile(d) => Some(d),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(d) => Some(d),
            #[cfg(feature = "redis")]
            Self::Redis(d) => Some(d),
            #[cfg(feature = "redis")]
            Self::RedisCluster(d) => Some(d),
            #[cfg(feature = "memcached")]
            Self::Memcached(_) => None,
            Self::Memory(_) => None,
            Self::Noop(_) => None,
        }
    }
}

/// The application-facing cache.
///
/// Constructed once via [`Cache::connect`]; construction never fails. If the
/// configured backend is unusable the facade runs on the no-op driver and
/// records why in [`Cache::setup_error`].
pub struct Cache {
    driver: ActiveDriver,
    config: CacheConfig,
    setup_error: Option<String>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl Cache {
    /// Build the configured backend, verify it with a probe and a full
    /// write/read/delete self test, and fall back to the no-op driver on
    /// any failure.
    pub async fn connect(config: CacheConfig) -> Self {
        let (driver, setup_error) = Self::build_driver(&config).await;

        let cache = Self {
            driver,
            config,
            setup_error,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        };

        if cache.is_active() {
            cache.write_journal().await;
        }
        cache
    }

    async fn build_driver(config: &CacheConfig) -> (ActiveDriver, Option<String>) {
        // Explicitly disabled: no error to record.
        if config.method == CacheMethod::Session {
            return (ActiveDriver::Noop(NoopDriver), None);
        }

        if let Err(e) = config.validate() {
            warn!(method = %config.method, "Invalid cache configuration: {e}");
            return (ActiveDriver::Noop(NoopDriver), Some(e.to_string()));
        }

        let built = Self::instantiate(config).await;
        let driver = match built {
            Ok(driver) => driver,
            Err(e) => {
                warn!(method = %config.method, "Cache backend construction failed: {e}");
                return (ActiveDriver::Noop(NoopDriver), Some(e.to_string()));
            }
        };

        let store = driver.as_store();
        if !store.probe().await || !store.self_test().await {
            let msg = format!("backend '{}' failed its self test", config.method);
            warn!("{msg}; running with cache disabled");
            return (ActiveDriver::Noop(NoopDriver), Some(msg));
        }

        debug!(method = %config.method, "Cache backend ready");
        (driver, None)
    }

    async fn instantiate(config: &CacheConfig) -> crate::error::CacheResult<ActiveDriver> {
        use crate::error::CacheError;

        match config.method {
            CacheMethod::File => Ok(ActiveDriver::File(
                FileDriver::new(&config.cache_dir, config.file_extension.clone()).await?,
            )),
            CacheMethod::AdvancedFile => Ok(ActiveDriver::AdvancedFile(
                TaggedFileDriver::new(&config.cache_dir, config.file_extension.clone()).await?,
            )),
            #[cfg(feature = "sqlite")]
            CacheMethod::Sqlite => {
                let path = config
                    .sqlite_path
                    .clone()
                    .ok_or_else(|| CacheError::Config("sqlite_path is required".into()))?;
                Ok(ActiveDriver::Sqlite(SqliteDriver::new(path).await?))
            }
            #[cfg(feature = "redis")]
            CacheMethod::Redis => Ok(ActiveDriver::Redis(
                RedisDriver::connect(&config.redis).await?,
            )),
            #[cfg(feature = "redis")]
            CacheMethod::RedisCluster => Ok(ActiveDriver::RedisCluster(
                RedisClusterDriver::connect(&config.redis).await?,
            )),
            #[cfg(feature = "memcached")]
            CacheMethod::Memcache => Ok(ActiveDriver::Memcached(
                MemcachedDriver::connect(
                    &config.memcache_host,
                    config.memcache_port,
                    DriverKind::Memcache,
                )
                .await?,
            )),
            #[cfg(feature = "memcached")]
            CacheMethod::Memcached => Ok(ActiveDriver::Memcached(
                MemcachedDriver::connect(
                    &config.memcache_host,
                    config.memcache_port,
                    DriverKind::Memcached,
                )
                .await?,
            )),
            CacheMethod::Apc => Ok(ActiveDriver::Memory(MemoryDriver::new())),
            CacheMethod::Session => Ok(ActiveDriver::Noop(NoopDriver)),
            #[allow(unreachable_patterns)]
            other => Err(CacheError::Config(format!(
                "backend '{other}' not compiled in"
            ))),
        }
    }

    /// Record backend activation in the journal key.
    ///
    /// The journal is bookkeeping, not cache data: it is written with a
    /// negative lifetime (no expiration metadata at all), is excluded from
    /// expiry sweeps, and never carries the key prefix.
    async fn write_journal(&self) {
        let key = journal_key(self.driver.as_store().kind());
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if let Err(e) = self.driver.as_store().store(&key, now.to_string(), -1).await {
            debug!("Journal write failed: {e}");
        }
    }

    /// Whether a real backend is serving requests (as opposed to the no-op
    /// fallback).
    pub fn is_active(&self) -> bool {
        !matches!(self.driver, ActiveDriver::Noop(_))
    }

    /// Why the configured backend was rejected, if it was.
    pub fn setup_error(&self) -> Option<&str> {
        self.setup_error.as_deref()
    }

    /// The backend actually in use.
    pub fn kind(&self) -> DriverKind {
        self.driver.as_store().kind()
    }

    fn build_key(&self, key: &str) -> String {
        self.config.build_key(key)
    }

    fn resolve_ttl(&self, ttl: Option<Lifetime>) -> Lifetime {
        ttl.unwrap_or(self.config.default_lifetime)
    }

    fn report<T>(&self, op: &str, result: crate::error::CacheResult<T>, fallback: T) -> T {
        match result {
            Ok(v) => v,
            Err(e) => {
                if self.config.debug {
                    warn!(op = %op, "Cache operation failed: {e}");
                } else {
                    debug!(op = %op, "Cache operation failed: {e}");
                }
                fallback
            }
        }
    }

    /// Fetch and deserialize a value. Any failure (missing key, expired
    /// entry, backend error, undecodable payload) is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let physical = self.build_key(key);
        let raw = self.report("get", self.driver.as_store().load(&physical).await, None);

        let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, "Discarding undecodable cache payload: {e}");
                None
            }
        });

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Fetch several keys at once. The result always contains every
    /// requested key; anything absent, expired, failed or undecodable maps
    /// to `None`, so callers can see exactly which parts of a batch need
    /// rebuilding.
    pub async fn get_multi<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> HashMap<String, Option<T>> {
        if keys.is_empty() {
            return HashMap::new();
        }

        let physical: Vec<String> = keys.iter().map(|k| self.build_key(k)).collect();
        let refs: Vec<&str> = physical.iter().map(String::as_str).collect();
        let raws = self.report(
            "get_multi",
            self.driver.as_store().load_multi(&refs).await,
            vec![None; keys.len()],
        );

        let mut out = HashMap::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(raws) {
            let value: Option<T> = raw.and_then(|raw| serde_json::from_str(&raw).ok());
            if value.is_some() {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            out.insert(key.to_string(), value);
        }
        out
    }

    /// Serialize and store a value. `ttl` falls back to the configured
    /// default lifetime; pass `Some(0)` for an entry that never expires.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Lifetime>) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, "Refusing unserializable cache value: {e}");
                return false;
            }
        };

        let physical = self.build_key(key);
        let ttl = self.resolve_ttl(ttl);
        let stored = self.report(
            "set",
            self.driver.as_store().store(&physical, raw, ttl).await,
            false,
        );
        if stored {
            self.inserts.fetch_add(1, Ordering::Relaxed);
        }
        stored
    }

    /// Store several entries. `true` only when every store succeeded.
    pub async fn set_multi<T: Serialize>(
        &self,
        entries: &[(&str, T)],
        ttl: Option<Lifetime>,
    ) -> bool {
        let mut all_ok = true;
        for (key, value) in entries {
            all_ok &= self.set(key, value, ttl).await;
        }
        all_ok
    }

    /// Fetch a value, or compute and store it on a miss. The builder's
    /// `None` is passed through uncached.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Option<Lifetime>, build: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if let Some(hit) = self.get(key).await {
            return Some(hit);
        }
        let value = build().await?;
        self.set(key, &value, ttl).await;
        Some(value)
    }

    /// Remove one entry. `false` when it did not exist or the backend
    /// refused.
    pub async fn flush(&self, key: &str) -> bool {
        let physical = self.build_key(key);
        self.report("flush", self.driver.as_store().delete(&physical).await, false)
    }

    /// Remove several entries. `true` only when every key was actually
    /// deleted; no rollback on partial failure.
    pub async fn flush_many(&self, keys: &[&str]) -> bool {
        let mut all_ok = true;
        for key in keys {
            all_ok &= self.flush(key).await;
        }
        all_ok
    }

    /// Remove every entry this cache owns.
    pub async fn flush_all(&self) -> bool {
        self.report("flush_all", self.driver.as_store().delete_all().await, false)
    }

    /// Whether `key` currently holds a live entry.
    pub async fn key_exists(&self, key: &str) -> bool {
        let physical = self.build_key(key);
        self.report(
            "key_exists",
            self.driver.as_store().key_exists(&physical).await,
            false,
        )
    }

    /// Associate an already-stored entry with invalidation tags. Tags are
    /// shared vocabulary across namespaces and are never prefixed; the
    /// entry key is. `false` on tagless backends.
    pub async fn set_cache_tag(&self, tags: &[&str], key: &str) -> bool {
        let Some(index) = self.driver.tags() else {
            return false;
        };
        let physical = self.build_key(key);
        self.report("set_cache_tag", index.tag_key(tags, &physical).await, false)
    }

    /// Destroy every entry carrying any of `tags`.
    ///
    /// The returned count is backend-specific: the symlink index reports
    /// deleted entries, the Redis backends report the number of tags, and
    /// SQLite always reports zero. Treat it as diagnostic, not as a
    /// deletion count. Always zero on tagless backends.
    pub async fn flush_tags(&self, tags: &[&str]) -> u64 {
        let Some(index) = self.driver.tags() else {
            return 0;
        };
        self.report("flush_tags", index.flush_by_tags(tags).await, 0)
    }

    /// Drop tag associations without touching the entries themselves.
    pub async fn clear_tags(&self, tags: &[&str]) -> bool {
        let Some(index) = self.driver.tags() else {
            return false;
        };
        self.report(
            "clear_tags",
            index.clear_tags(tags).await.map(|()| true),
            false,
        )
    }

    /// The logical keys carrying any of `tags`, with the configured prefix
    /// stripped back off. Empty on tagless backends.
    pub async fn keys_by_tag(&self, tags: &[&str]) -> Vec<String> {
        let Some(index) = self.driver.tags() else {
            return Vec::new();
        };
        let keys = self.report("keys_by_tag", index.keys_by_tags(tags).await, Vec::new());

        match &self.config.prefix {
            Some(prefix) => keys
                .into_iter()
                .map(|k| k.strip_prefix(prefix.as_str()).map(str::to_string).unwrap_or(k))
                .collect(),
            None => keys,
        }
    }

    /// Backend statistics merged with this facade's own counters. The
    /// facade counters win when the backend cannot report a metric.
    pub async fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.report(
            "stats",
            self.driver.as_store().stats().await,
            StatsSnapshot::default(),
        );
        snapshot.hits = snapshot.hits.or(Some(self.hits.load(Ordering::Relaxed)));
        snapshot.misses = snapshot
            .misses
            .or(Some(self.misses.load(Ordering::Relaxed)));
        snapshot.inserts = snapshot
            .inserts
            .or(Some(self.inserts.load(Ordering::Relaxed)));
        snapshot
    }

    /// Hits observed by this facade instance.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses observed by this facade instance.
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Product {
        id: u32,
        name: String,
    }

    async fn file_cache() -> (tempfile::TempDir, Cache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::connect(CacheConfig::file(dir.path())).await;
        assert!(cache.is_active());
        (dir, cache)
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let (_dir, cache) = file_cache().await;
        let product = Product {
            id: 42,
            name: "widget".into(),
        };

        assert!(cache.set("p42", &product, None).await);
        assert_eq!(cache.get::<Product>("p42").await, Some(product));
        assert_eq!(cache.hit_count(), 1);
    }

    #[tokio::test]
    async fn test_miss_is_none_not_error() {
        let (_dir, cache) = file_cache().await;
        assert_eq!(cache.get::<Product>("ghost").await, None);
        assert_eq!(cache.miss_count(), 1);
    }

    #[tokio::test]
    async fn test_session_method_is_silent_noop() {
        let cache = Cache::connect(CacheConfig::session()).await;
        assert!(!cache.is_active());
        assert_eq!(cache.setup_error(), None);
        assert!(!cache.set("k", &1u32, None).await);
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn test_broken_backend_falls_back_fail_open() {
        // A file root that cannot be created.
        let cache = Cache::connect(CacheConfig::file("/proc/keel/nope")).await;
        assert!(!cache.is_active());
        assert!(cache.setup_error().is_some());
        assert_eq!(cache.get::<u32>("k").await, None);
        assert!(!cache.flush_all().await);
    }

    #[tokio::test]
    async fn test_prefix_applies_to_entries_not_tags() {
        let dir = tempfile::tempdir().unwrap();
        let cache =
            Cache::connect(CacheConfig::advanced_file(dir.path()).with_prefix("shop.")).await;
        assert!(cache.is_active());

        cache.set("p42", &1u32, Some(0)).await;
        assert!(cache.set_cache_tag(&["cat_5"], "p42").await);

        // The symlink lands under the unprefixed tag path, named after the
        // prefixed entry key.
        assert!(dir.path().join("cat").join("5").join("shop.p42").exists());
        assert_eq!(cache.keys_by_tag(&["cat_5"]).await, vec!["p42".to_string()]);
    }

    #[tokio::test]
    async fn test_flush_tags_on_tagged_file_counts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::connect(CacheConfig::advanced_file(dir.path())).await;

        cache.set("p1", &1u32, Some(0)).await;
        cache.set("p2", &2u32, Some(0)).await;
        cache.set_cache_tag(&["grp"], "p1").await;
        cache.set_cache_tag(&["grp"], "p2").await;

        assert_eq!(cache.flush_tags(&["grp"]).await, 2);
        assert_eq!(cache.get::<u32>("p1").await, None);
        assert_eq!(cache.get::<u32>("p2").await, None);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_flush_tags_on_sqlite_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::connect(CacheConfig::sqlite(dir.path().join("cache.db"))).await;
        assert!(cache.is_active());

        cache.set("p1", &1u32, Some(0)).await;
        cache.set_cache_tag(&["grp"], "p1").await;

        assert_eq!(cache.flush_tags(&["grp"]).await, 0);
        assert_eq!(cache.get::<u32>("p1").await, None);
    }

    #[tokio::test]
    async fn test_plain_file_accepts_and_ignores_tags() {
        let (_dir, cache) = file_cache().await;
        cache.set("p1", &1u32, Some(0)).await;

        assert!(!cache.set_cache_tag(&["grp"], "p1").await);
        assert_eq!(cache.flush_tags(&["grp"]).await, 0);
        // The entry itself is untouched.
        assert_eq!(cache.get::<u32>("p1").await, Some(1));
    }

    #[tokio::test]
    async fn test_apc_has_no_tag_index() {
        let cache = Cache::connect(CacheConfig::apc()).await;
        assert!(cache.is_active());
        cache.set("p1", &1u32, None).await;
        assert!(!cache.set_cache_tag(&["grp"], "p1").await);
        assert!(cache.keys_by_tag(&["grp"]).await.is_empty());
    }

    #[tokio::test]
    async fn test_get_multi_maps_every_requested_key() {
        let (_dir, cache) = file_cache().await;
        cache.set("a", &1u32, None).await;
        cache.set("b", &2u32, None).await;

        let values = cache.get_multi::<u32>(&["a", "b", "ghost"]).await;
        assert_eq!(values.len(), 3);
        assert_eq!(values["a"], Some(1));
        assert_eq!(values["b"], Some(2));
        assert_eq!(values["ghost"], None);
        assert!(cache.get_multi::<u32>(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_set_multi_and_flush_many() {
        let (_dir, cache) = file_cache().await;
        assert!(cache.set_multi(&[("a", 1u32), ("b", 2u32)], None).await);
        assert!(cache.flush_many(&["a", "b"]).await);
        // A key that was never stored makes the batch report failure.
        assert!(!cache.flush_many(&["ghost"]).await);
    }

    #[tokio::test]
    async fn test_get_or_set_builds_once() {
        let (_dir, cache) = file_cache().await;

        let built = cache
            .get_or_set("p42", None, || async { Some(7u32) })
            .await;
        assert_eq!(built, Some(7));

        // Second call is served from cache; the builder must not run.
        let cached = cache
            .get_or_set("p42", None, || async {
                panic!("builder ran on a warm key")
            })
            .await;
        assert_eq!(cached, Some(7u32));
    }

    #[tokio::test]
    async fn test_journal_written_without_prefix_or_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::connect(CacheConfig::file(dir.path()).with_prefix("shop.")).await;
        assert!(cache.is_active());

        // Visible under its raw name, not under the prefix.
        let path = dir.path().join("file_journal.cache");
        assert!(path.exists());
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"lifetime\":-1"));
    }

    #[tokio::test]
    async fn test_stats_merges_facade_counters() {
        let (_dir, cache) = file_cache().await;
        cache.set("a", &1u32, None).await;
        cache.get::<u32>("a").await;
        cache.get::<u32>("ghost").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, Some(1));
        assert_eq!(stats.misses, Some(1));
        assert_eq!(stats.inserts, Some(1));
        // Journal plus the stored entry.
        assert_eq!(stats.entries, Some(2));
    }
}
