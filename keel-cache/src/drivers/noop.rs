//! Disabled-cache placeholder driver.
//!
//! Exists so a degraded "cache disabled" configuration still satisfies the
//! driver contract: every read is a miss, every write reports failure, and
//! the facade needs no special-casing.

use crate::error::CacheResult;
use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot};
use async_trait::async_trait;

/// No-op driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDriver;

#[async_trait]
impl CacheDriver for NoopDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Session
    }

    async fn probe(&self) -> bool {
        false
    }

    async fn self_test(&self) -> bool {
        false
    }

    async fn store(&self, _key: &str, _value: String, _ttl: Lifetime) -> CacheResult<bool> {
        Ok(false)
    }

    async fn load(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn delete_all(&self) -> CacheResult<bool> {
        Ok(false)
    }

    async fn stats(&self) -> CacheResult<StatsSnapshot> {
        Ok(StatsSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_everything_is_a_safe_miss() {
        let driver = NoopDriver;
        assert!(!driver.probe().await);
        assert!(!driver.store("k", "v".into(), 0).await.unwrap());
        assert_eq!(driver.load("k").await.unwrap(), None);
        assert!(!driver.delete("k").await.unwrap());
        assert!(!driver.delete_all().await.unwrap());
    }
}
