//! Single-node Redis driver.
//!
//! Entries are plain string keys. The tag index is one Redis set per tag
//! (`tag:<name>`) holding the tagged entry keys; group invalidation deletes
//! the union of the member keys plus the tag sets themselves in one atomic
//! pipeline.

use crate::error::CacheResult;
use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot, TagIndex, journal_key};
use async_trait::async_trait;
use keel_redis::redis::{self, AsyncCommands, aio::ConnectionManager};
use keel_redis::{RedisConfig, connect_single};
use tracing::{debug, warn};

fn tag_set(tag: &str) -> String {
    format!("tag:{tag}")
}

/// Single-node Redis cache driver.
#[derive(Clone)]
pub struct RedisDriver {
    connection: ConnectionManager,
    journal: String,
}

impl RedisDriver {
    /// Connect using the given configuration.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let connection = connect_single(config).await?;
        Ok(Self::from_connection(connection))
    }

    /// Wrap an already-established connection (used by tests).
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            journal: journal_key(DriverKind::Redis),
        }
    }

    async fn info_field(&self, section: &str, field: &str) -> Option<u64> {
        let mut conn = self.connection.clone();
        let info: String = redis::cmd("INFO")
            .arg(section)
            .query_async(&mut conn)
            .await
            .ok()?;
        parse_info_field(&info, field)
    }
}

fn parse_info_field(info: &str, field: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix(field)?.strip_prefix(':'))
        .and_then(|v| v.trim().parse().ok())
}

#[async_trait]
impl CacheDriver for RedisDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Redis
    }

    async fn probe(&self) -> bool {
        let mut conn = self.connection.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Redis unreachable: {e}");
                false
            }
        }
    }

    async fn store(&self, key: &str, value: String, ttl: Lifetime) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        // The journal key never carries a TTL, whatever the caller passed;
        // zero and negative lifetimes map to a key without one.
        if ttl > 0 && key != self.journal {
            let _: () = conn.set_ex(key, value, ttl as u64).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }
        Ok(true)
    }

    async fn load(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_all(&self) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(true)
    }

    async fn stats(&self) -> CacheResult<StatsSnapshot> {
        let mut conn = self.connection.clone();
        let entries: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;

        Ok(StatsSnapshot {
            entries: Some(entries),
            hits: self.info_field("stats", "keyspace_hits").await,
            misses: self.info_field("stats", "keyspace_misses").await,
            inserts: None,
            mem_bytes: self.info_field("memory", "used_memory").await,
            per_node: Vec::new(),
        })
    }

    async fn load_multi(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        // MGET always answers with an array, even for one key.
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(*key);
        }
        let values: Vec<Option<String>> = cmd.query_async(&mut conn).await?;
        Ok(values)
    }

    async fn key_exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }
}

#[async_trait]
impl TagIndex for RedisDriver {
    async fn tag_key(&self, tags: &[&str], key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        for tag in tags {
            let _: () = conn.sadd(tag_set(tag), key).await?;
        }
        Ok(true)
    }

    /// Returns the number of tags passed in, not the number of entries
    /// removed. Callers relying on the count know this contract.
    async fn flush_by_tags(&self, tags: &[&str]) -> CacheResult<u64> {
        if tags.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let sets: Vec<String> = tags.iter().map(|t| tag_set(t)).collect();
        let members: Vec<String> = conn.sunion(&sets).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for member in &members {
            pipe.del(member).ignore();
        }
        for set in &sets {
            pipe.del(set).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(tags = ?tags, entries = members.len(), "Flushed tags");
        Ok(tags.len() as u64)
    }

    async fn keys_by_tags(&self, tags: &[&str]) -> CacheResult<Vec<String>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        let sets: Vec<String> = tags.iter().map(|t| tag_set(t)).collect();
        let mut keys: Vec<String> = conn.sunion(&sets).await?;
        keys.sort();
        Ok(keys)
    }

    async fn clear_tags(&self, tags: &[&str]) -> CacheResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let sets: Vec<String> = tags.iter().map(|t| tag_set(t)).collect();
        let _: () = conn.del(sets).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_set_naming() {
        assert_eq!(tag_set("cat_5"), "tag:cat_5");
    }

    #[test]
    fn test_parse_info_field() {
        let info = "# Stats\r\nkeyspace_hits:42\r\nkeyspace_misses:7\r\n";
        assert_eq!(parse_info_field(info, "keyspace_hits"), Some(42));
        assert_eq!(parse_info_field(info, "keyspace_misses"), Some(7));
        assert_eq!(parse_info_field(info, "expired_keys"), None);
    }

    // Requires a local Redis on 6379.
    #[tokio::test]
    #[ignore]
    async fn test_live_tag_flush() {
        let config = RedisConfig::builder().host("127.0.0.1").port(6379).build();
        let driver = RedisDriver::connect(&config).await.unwrap();

        driver.store("keel_p1", "1".into(), 60).await.unwrap();
        driver.store("keel_p2", "2".into(), 60).await.unwrap();
        driver.tag_key(&["keel_grp"], "keel_p1").await.unwrap();
        driver.tag_key(&["keel_grp"], "keel_p2").await.unwrap();

        let count = driver.flush_by_tags(&["keel_grp"]).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(driver.load("keel_p1").await.unwrap(), None);
        assert_eq!(driver.load("keel_p2").await.unwrap(), None);
    }
}
