//! Embedded SQLite driver.
//!
//! Tuned for low-durability, high-throughput local caching: WAL journal,
//! relaxed sync, in-memory temp store. Durability after a crash is
//! explicitly not guaranteed; this is a performance cache, not a system of
//! record.
//!
//! Expiry is governed by the engine's clock (`DATETIME('now', ...)` on
//! write, `CURRENT_TIMESTAMP < lifetime` on read), and garbage collection
//! is lazy: expired rows are purged opportunistically on `delete`, never by
//! a background sweep.

use crate::error::{CacheError, CacheResult};
use crate::traits::{journal_key, CacheDriver, DriverKind, Lifetime, StatsSnapshot, TagIndex};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
    id TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    lifetime TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_cache_lifetime ON cache(lifetime);

CREATE TABLE IF NOT EXISTS cache_tag (
    group_id TEXT NOT NULL,
    id TEXT NOT NULL,
    PRIMARY KEY (group_id, id)
);
"#;

/// Sentinel lifetime for entries that never expire, so the read filter
/// stays a single uniform comparison.
const FAR_FUTURE: &str = "9999-12-31 23:59:59";

/// SQLite cache driver.
///
/// The `rusqlite` connection is synchronous, so every operation runs on the
/// blocking pool behind a mutex-guarded shared handle.
#[derive(Clone)]
pub struct SqliteDriver {
    conn: Arc<Mutex<Connection>>,
    journal: String,
}

impl SqliteDriver {
    /// Open (or create) the cache database at `path`.
    pub async fn new(path: impl Into<PathBuf>) -> CacheResult<Self> {
        let path = path.into();
        let conn = tokio::task::spawn_blocking(move || -> CacheResult<Connection> {
            let conn = Connection::open(&path)?;
            Self::init(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| CacheError::Other(format!("Task join error: {}", e)))??;

        debug!("Initialized SQLite cache");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            journal: journal_key(DriverKind::Sqlite),
        })
    }

    /// In-memory database, for tests.
    pub async fn in_memory() -> CacheResult<Self> {
        let conn = tokio::task::spawn_blocking(|| -> CacheResult<Connection> {
            let conn = Connection::open_in_memory()?;
            Self::init(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| CacheError::Other(format!("Task join error: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            journal: journal_key(DriverKind::Sqlite),
        })
    }

    fn init(conn: &Connection) -> CacheResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=OFF;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> CacheResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| CacheError::Other(format!("Task join error: {}", e)))?
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(",")
    }
}

#[async_trait]
impl CacheDriver for SqliteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn probe(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(CacheError::from)
        })
        .await
        .is_ok()
    }

    async fn store(&self, key: &str, value: String, ttl: Lifetime) -> CacheResult<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            if ttl > 0 {
                conn.execute(
                    "INSERT OR REPLACE INTO cache (id, value, lifetime)
                     VALUES (?1, ?2, DATETIME('now', ?3))",
                    params![key, value, format!("+{} seconds", ttl)],
                )?;
            } else {
                conn.execute(
                    "INSERT OR REPLACE INTO cache (id, value, lifetime) VALUES (?1, ?2, ?3)",
                    params![key, value, FAR_FUTURE],
                )?;
            }
            Ok(true)
        })
        .await
    }

    async fn load(&self, key: &str) -> CacheResult<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM cache WHERE id = ?1 AND CURRENT_TIMESTAMP < lifetime",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let key = key.to_string();
        let journal = self.journal.clone();
        self.with_conn(move |conn| {
            // Opportunistic purge of globally expired rows; the journal row
            // is bookkeeping and exempt from expiry scans.
            conn.execute(
                "DELETE FROM cache WHERE lifetime < CURRENT_TIMESTAMP AND id <> ?1",
                params![journal],
            )?;
            let changed = conn.execute("DELETE FROM cache WHERE id = ?1", params![key])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_all(&self) -> CacheResult<bool> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache", [])?;
            conn.execute("DELETE FROM cache_tag", [])?;
            Ok(true)
        })
        .await
    }

    async fn stats(&self) -> CacheResult<StatsSnapshot> {
        self.with_conn(|conn| {
            let entries: u64 = conn.query_row(
                "SELECT COUNT(*) FROM cache WHERE CURRENT_TIMESTAMP < lifetime",
                [],
                |row| row.get(0),
            )?;
            let bytes: u64 = conn.query_row(
                "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM cache",
                [],
                |row| row.get(0),
            )?;
            Ok(StatsSnapshot {
                entries: Some(entries),
                mem_bytes: Some(bytes),
                ..Default::default()
            })
        })
        .await
    }
}

#[async_trait]
impl TagIndex for SqliteDriver {
    async fn tag_key(&self, tags: &[&str], key: &str) -> CacheResult<bool> {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let key = key.to_string();
        self.with_conn(move |conn| {
            for tag in &tags {
                conn.execute(
                    "INSERT OR IGNORE INTO cache_tag (group_id, id) VALUES (?1, ?2)",
                    params![tag, key],
                )?;
            }
            Ok(true)
        })
        .await
    }

    /// Two-step delete: entry rows joined through `cache_tag`, then the
    /// `cache_tag` rows themselves. Always returns 0 — a known asymmetry
    /// with the other tagged drivers, preserved deliberately.
    async fn flush_by_tags(&self, tags: &[&str]) -> CacheResult<u64> {
        if tags.is_empty() {
            return Ok(0);
        }
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        self.with_conn(move |conn| {
            let ph = Self::placeholders(tags.len());
            conn.execute(
                &format!(
                    "DELETE FROM cache WHERE id IN
                     (SELECT id FROM cache_tag WHERE group_id IN ({ph}))"
                ),
                params_from_iter(tags.iter()),
            )?;
            conn.execute(
                &format!("DELETE FROM cache_tag WHERE group_id IN ({ph})"),
                params_from_iter(tags.iter()),
            )?;
            Ok(0)
        })
        .await
    }

    async fn keys_by_tags(&self, tags: &[&str]) -> CacheResult<Vec<String>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        self.with_conn(move |conn| {
            let ph = Self::placeholders(tags.len());
            let mut stmt = conn.prepare(&format!(
                "SELECT DISTINCT id FROM cache_tag WHERE group_id IN ({ph}) ORDER BY id"
            ))?;
            let keys = stmt
                .query_map(params_from_iter(tags.iter()), |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn clear_tags(&self, tags: &[&str]) -> CacheResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        self.with_conn(move |conn| {
            let ph = Self::placeholders(tags.len());
            conn.execute(
                &format!("DELETE FROM cache_tag WHERE group_id IN ({ph})"),
                params_from_iter(tags.iter()),
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let driver = SqliteDriver::in_memory().await.unwrap();
        assert!(driver.store("p42", "{\"id\":42}".into(), 60).await.unwrap());
        assert_eq!(
            driver.load("p42").await.unwrap().as_deref(),
            Some("{\"id\":42}")
        );
        assert!(driver.delete("p42").await.unwrap());
        assert_eq!(driver.load("p42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiry_uses_engine_clock() {
        let driver = SqliteDriver::in_memory().await.unwrap();
        driver.store("short", "1".into(), 1).await.unwrap();
        assert!(driver.load("short").await.unwrap().is_some());
        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
        assert_eq!(driver.load("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let driver = SqliteDriver::in_memory().await.unwrap();
        driver.store("pin", "1".into(), 0).await.unwrap();
        assert!(driver.load("pin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_purges_expired_rows() {
        let driver = SqliteDriver::in_memory().await.unwrap();
        driver.store("short", "1".into(), 1).await.unwrap();
        driver.store("other", "2".into(), 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

        // Targeted delete of an unrelated key sweeps the expired row too.
        driver.delete("other").await.unwrap();
        let stats = driver.stats().await.unwrap();
        assert_eq!(stats.entries, Some(0));
        assert_eq!(stats.mem_bytes, Some(0));
    }

    #[tokio::test]
    async fn test_flush_by_tags_returns_zero() {
        let driver = SqliteDriver::in_memory().await.unwrap();
        driver.store("k1", "1".into(), 0).await.unwrap();
        driver.store("k2", "2".into(), 0).await.unwrap();
        driver.tag_key(&["a"], "k1").await.unwrap();
        driver.tag_key(&["b"], "k2").await.unwrap();

        let count = driver.flush_by_tags(&["a"]).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(driver.load("k1").await.unwrap(), None);
        assert_eq!(driver.load("k2").await.unwrap().as_deref(), Some("2"));
        assert!(driver.keys_by_tags(&["a"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_unknown_tag_is_noop() {
        let driver = SqliteDriver::in_memory().await.unwrap();
        assert_eq!(driver.flush_by_tags(&["nope"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keys_by_tags_union() {
        let driver = SqliteDriver::in_memory().await.unwrap();
        driver.tag_key(&["t1", "t2"], "k9").await.unwrap();
        driver.tag_key(&["t2"], "k1").await.unwrap();
        let keys = driver.keys_by_tags(&["t1", "t2"]).await.unwrap();
        assert_eq!(keys, vec!["k1".to_string(), "k9".to_string()]);
    }

    #[tokio::test]
    async fn test_probe_and_self_test() {
        let driver = SqliteDriver::in_memory().await.unwrap();
        assert!(driver.probe().await);
        assert!(driver.self_test().await);
    }
}
