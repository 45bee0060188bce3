//! In-process memory driver (the APC-style backend).
//!
//! Entries live in a shared map guarded by an async RwLock; expiry is
//! evaluated lazily on read, there is no background sweep.

use crate::error::CacheResult;
use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// In-process memory cache driver.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    data: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryDriver {
    /// Create an empty in-process cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheDriver for MemoryDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Apc
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn store(&self, key: &str, value: String, ttl: Lifetime) -> CacheResult<bool> {
        let expires_at = if ttl > 0 {
            Some(Instant::now() + std::time::Duration::from_secs(ttl as u64))
        } else {
            None
        };
        self.data
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn load(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        {
            let data = self.data.read().await;
            match data.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Stale entry: lazily drop it.
        self.data.write().await.remove(key);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn delete_all(&self) -> CacheResult<bool> {
        self.data.write().await.clear();
        Ok(true)
    }

    async fn stats(&self) -> CacheResult<StatsSnapshot> {
        let data = self.data.read().await;
        let now = Instant::now();
        let mut entries = 0u64;
        let mut bytes = 0u64;
        for (key, entry) in data.iter() {
            if entry.is_live(now) {
                entries += 1;
                bytes += (key.len() + entry.value.len()) as u64;
            }
        }
        Ok(StatsSnapshot {
            entries: Some(entries),
            mem_bytes: Some(bytes),
            ..Default::default()
        })
    }
}
