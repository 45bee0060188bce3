//! Clustered Redis driver.
//!
//! Same entry and tag model as the single-node driver, with two cluster
//! realities worked around: multi-key commands cannot cross hash slots, so
//! tag flushes delete keys one by one, and keyspace-wide commands (FLUSHDB,
//! DBSIZE, INFO) are routed to every master explicitly.

use crate::error::CacheResult;
use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot, TagIndex, journal_key};
use async_trait::async_trait;
use keel_redis::redis::cluster_async::ClusterConnection;
use keel_redis::redis::cluster_routing::{
    AggregateOp, MultipleNodeRoutingInfo, ResponsePolicy, RoutingInfo,
};
use keel_redis::redis::{self, AsyncCommands, Value};
use keel_redis::{RedisConfig, connect_cluster};
use std::collections::HashSet;
use tracing::{debug, warn};

fn tag_set(tag: &str) -> String {
    format!("tag:{tag}")
}

/// Redis cluster cache driver.
#[derive(Clone)]
pub struct RedisClusterDriver {
    connection: ClusterConnection,
    journal: String,
}

impl RedisClusterDriver {
    /// Connect using the configured seed nodes.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let connection = connect_cluster(config).await?;
        Ok(Self {
            connection,
            journal: journal_key(DriverKind::RedisCluster),
        })
    }

    fn all_masters(policy: Option<ResponsePolicy>) -> RoutingInfo {
        RoutingInfo::MultiNode((MultipleNodeRoutingInfo::AllMasters, policy))
    }

    /// Distinct entry keys carried by any of `tags`, gathered set by set
    /// because the tag sets land on different slots.
    async fn members_of(&self, tags: &[&str]) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut members = HashSet::new();
        for tag in tags {
            let keys: Vec<String> = conn.smembers(tag_set(tag)).await?;
            members.extend(keys);
        }
        let mut members: Vec<String> = members.into_iter().collect();
        members.sort();
        Ok(members)
    }
}

#[async_trait]
impl CacheDriver for RedisClusterDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::RedisCluster
    }

    async fn probe(&self) -> bool {
        let mut conn = self.connection.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Redis cluster unreachable: {e}");
                false
            }
        }
    }

    async fn store(&self, key: &str, value: String, ttl: Lifetime) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        // Journal key stays TTL-free even when a positive ttl is passed.
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
        conn.route_command(
            redis::cmd("FLUSHDB"),
            Self::all_masters(Some(ResponsePolicy::AllSucceeded)),
        )
        .await?;
        Ok(true)
    }

    async fn stats(&self) -> CacheResult<StatsSnapshot> {
        let mut conn = self.connection.clone();

        let entries = conn
            .route_command(
                redis::cmd("DBSIZE"),
                Self::all_masters(Some(ResponsePolicy::Aggregate(AggregateOp::Sum))),
            )
            .await
            .ok()
            .and_then(|v| redis::from_redis_value::<u64>(v).ok());

        // INFO with no response policy answers with one blob per master.
        // They stay separate: nodes have independent uptimes and counters,
        // so any aggregate would be meaningless.
        let mut per_node = Vec::new();
        match conn
            .route_command(redis::cmd("INFO"), Self::all_masters(None))
            .await
        {
            Ok(Value::Map(nodes)) => {
                for (addr, info) in nodes {
                    let addr: String = redis::from_redis_value(addr)
                        .unwrap_or_else(|_| "unknown".to_string());
                    let info: String = redis::from_redis_value(info).unwrap_or_default();
                    let summary: Vec<&str> = info
                        .lines()
                        .filter(|l| {
                            l.starts_with("used_memory:")
                                || l.starts_with("keyspace_hits:")
                                || l.starts_with("keyspace_misses:")
                                || l.starts_with("uptime_in_seconds:")
                        })
                        .collect();
                    per_node.push(format!("{addr}: {}", summary.join(";")));
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Cluster INFO failed: {e}"),
        }

        Ok(StatsSnapshot {
            entries,
            per_node,
            ..Default::default()
        })
    }

    async fn key_exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }
}

#[async_trait]
impl TagIndex for RedisClusterDriver {
    async fn tag_key(&self, tags: &[&str], key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        for tag in tags {
            let _: () = conn.sadd(tag_set(tag), key).await?;
        }
        Ok(true)
    }

    /// Returns the number of tags passed in, matching the single-node
    /// driver. Deletions are per key: the members of a tag set hash to
    /// arbitrary slots, so there is no atomic multi-key variant here.
    async fn flush_by_tags(&self, tags: &[&str]) -> CacheResult<u64> {
        if tags.is_empty() {
            return Ok(0);
        }

        let members = self.members_of(tags).await?;
        let mut conn = self.connection.clone();
        for member in &members {
            let _: () = conn.del(member).await?;
        }
        for tag in tags {
            let _: () = conn.del(tag_set(tag)).await?;
        }

        debug!(tags = ?tags, entries = members.len(), "Flushed tags across cluster");
        Ok(tags.len() as u64)
    }

    async fn keys_by_tags(&self, tags: &[&str]) -> CacheResult<Vec<String>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        self.members_of(tags).await
    }

    async fn clear_tags(&self, tags: &[&str]) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        for tag in tags {
            let _: () = conn.del(tag_set(tag)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_redis::ClusterStrategy;

    // Requires a local cluster with a node on 7000.
    #[tokio::test]
    #[ignore]
    async fn test_live_cluster_round_trip() {
        let config = RedisConfig::builder()
            .cluster_nodes(vec!["127.0.0.1:7000".into()])
            .strategy(ClusterStrategy::DistributeReads)
            .build();
        let driver = RedisClusterDriver::connect(&config).await.unwrap();

        assert!(driver.probe().await);
        driver.store("keel_c1", "1".into(), 60).await.unwrap();
        assert_eq!(driver.load("keel_c1").await.unwrap().as_deref(), Some("1"));
        driver.tag_key(&["keel_cgrp"], "keel_c1").await.unwrap();
        assert_eq!(driver.flush_by_tags(&["keel_cgrp"]).await.unwrap(), 1);
        assert_eq!(driver.load("keel_c1").await.unwrap(), None);
    }
}
