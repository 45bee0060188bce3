//! Memcache daemon driver.
//!
//! One struct serves both daemon-backed methods: they differ only in the
//! wire protocol the client speaks (ascii vs binary), selected through the
//! connection URL.
//!
//! Note: the `memcache` crate has no native async support, so the client is
//! wrapped in tokio's Mutex and every operation runs under `spawn_blocking`.

use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Memcached silently treats relative expirations above 30 days as absolute
/// unix timestamps, which would expire entries immediately. Larger TTLs are
/// clamped to this ceiling.
pub const MAX_DAEMON_TTL: Lifetime = 30 * 24 * 60 * 60;

/// Memcache daemon store. No tag support: the daemon has no server-side
/// index to build one on.
#[derive(Clone)]
pub struct MemcachedDriver {
    client: Arc<Mutex<memcache::Client>>,
    kind: DriverKind,
}

impl MemcachedDriver {
    /// Connect to a daemon at `host:port`.
    ///
    /// `kind` must be [`DriverKind::Memcache`] (ascii protocol) or
    /// [`DriverKind::Memcached`] (binary protocol).
    pub async fn connect(host: &str, port: u16, kind: DriverKind) -> CacheResult<Self> {
        let url = Self::connection_url(host, port, kind)?;
        debug!(url = %url, "Connecting to memcache daemon");

        let client = tokio::task::spawn_blocking(move || memcache::connect(url.as_str()))
            .await
            .map_err(|e| CacheError::Other(format!("task join error: {e}")))??;

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            kind,
        })
    }

    fn connection_url(host: &str, port: u16, kind: DriverKind) -> CacheResult<String> {
        match kind {
            DriverKind::Memcache => Ok(format!("memcache://{host}:{port}?protocol=ascii")),
            DriverKind::Memcached => Ok(format!("memcache://{host}:{port}")),
            other => Err(CacheError::Config(format!(
                "not a memcache daemon method: {other}"
            ))),
        }
    }

    /// Map a lifetime to the daemon's expiration field. Zero and negative
    /// lifetimes both become "never expires"; the daemon cannot store an
    /// entry without expiration metadata.
    fn expiration(ttl: Lifetime) -> u32 {
        if ttl <= 0 {
            0
        } else {
            ttl.min(MAX_DAEMON_TTL) as u32
        }
    }

    /// Run a blocking client operation on the blocking thread pool.
    async fn with_client<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
    {
        let client = self.client.clone();
        let result = tokio::task::spawn_blocking(move || {
            let client = client.blocking_lock();
            op(&client)
        })
        .await
        .map_err(|e| CacheError::Other(format!("task join error: {e}")))?;
        Ok(result?)
    }
}

#[async_trait]
impl CacheDriver for MemcachedDriver {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    async fn probe(&self) -> bool {
        match self.with_client(|client| client.version()).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Memcache daemon unreachable: {e}");
                false
            }
        }
    }

    async fn store(&self, key: &str, value: String, ttl: Lifetime) -> CacheResult<bool> {
        let key = key.to_string();
        let expiration = Self::expiration(ttl);
        self.with_client(move |client| client.set(&key, value, expiration))
            .await?;
        Ok(true)
    }

    async fn load(&self, key: &str) -> CacheResult<Option<String>> {
        let key = key.to_string();
        self.with_client(move |client| client.get::<String>(&key))
            .await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let key = key.to_string();
        self.with_client(move |client| client.delete(&key)).await
    }

    async fn delete_all(&self) -> CacheResult<bool> {
        self.with_client(|client| client.flush()).await?;
        Ok(true)
    }

    async fn stats(&self) -> CacheResult<StatsSnapshot> {
        let raw = self.with_client(|client| client.stats()).await?;

        let mut snapshot = StatsSnapshot::default();
        let mut entries = 0u64;
        let mut hits = 0u64;
        let mut misses = 0u64;
        let mut inserts = 0u64;
        let mut bytes = 0u64;

        for (server, stats) in &raw {
            entries += read_stat(stats, "curr_items");
            hits += read_stat(stats, "get_hits");
            misses += read_stat(stats, "get_misses");
            inserts += read_stat(stats, "cmd_set");
            bytes += read_stat(stats, "bytes");

            let mut pairs: Vec<String> = stats.iter().map(|(k, v)| format!("{k}={v}")).collect();
            pairs.sort();
            snapshot.per_node.push(format!("{server}: {}", pairs.join(";")));
        }

        snapshot.entries = Some(entries);
        snapshot.hits = Some(hits);
        snapshot.misses = Some(misses);
        snapshot.inserts = Some(inserts);
        snapshot.mem_bytes = Some(bytes);
        Ok(snapshot)
    }

    async fn load_multi(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        let owned: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let mut found: HashMap<String, String> = self
            .with_client(move |client| {
                let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
                client.gets::<String>(&refs)
            })
            .await?;
        Ok(keys.iter().map(|k| found.remove(*k)).collect())
    }
}

fn read_stat(stats: &HashMap<String, String>, key: &str) -> u64 {
    stats.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}
