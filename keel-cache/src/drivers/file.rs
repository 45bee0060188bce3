//! Plain filesystem driver.

use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot, TagIndex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

/// On-disk payload envelope for file-based drivers.
///
/// The value is the caller's opaque serialized payload; liveness is derived
/// from the file's mtime at read time, so only the lifetime needs storing.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub value: String,
    pub lifetime: Lifetime,
}

/// Filesystem cache driver. One file per entry under the cache root.
#[derive(Clone)]
pub struct FileDriver {
    root: PathBuf,
    extension: String,
}

impl FileDriver {
    /// Create a driver rooted at `dir`, creating it if needed.
    pub async fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> CacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let root = fs::canonicalize(&dir).await?;
        debug!(root = ?root, "Initialized file cache");
        Ok(Self {
            root,
            extension: extension.into(),
        })
    }

    /// The canonical cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the entry file for `key`, refusing any key whose resolved
    /// parent directory is not the cache root itself (path traversal
    /// defense against crafted keys).
    pub(crate) async fn entry_path(&self, key: &str) -> CacheResult<PathBuf> {
        let path = self.root.join(format!("{}{}", key, self.extension));
        let parent = path
            .parent()
            .ok_or_else(|| CacheError::Config(format!("invalid cache key: {key}")))?;
        let canonical_parent = fs::canonicalize(parent)
            .await
            .map_err(|_| CacheError::Config(format!("invalid cache key: {key}")))?;
        if canonical_parent != self.root {
            return Err(CacheError::Config(format!(
                "cache key escapes cache directory: {key}"
            )));
        }
        Ok(path)
    }

    async fn remove_quietly(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?path, "Failed to remove stale cache file: {e}");
            }
        }
    }
}

#[async_trait]
impl CacheDriver for FileDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::File
    }

    async fn probe(&self) -> bool {
        let probe = self.root.join(".keel_probe");
        match fs::write(&probe, b"probe").await {
            Ok(()) => {
                let _ = fs::remove_file(&probe).await;
                true
            }
            Err(e) => {
                warn!(root = ?self.root, "Cache directory not writable: {e}");
                false
            }
        }
    }

    async fn store(&self, key: &str, value: String, ttl: Lifetime) -> CacheResult<bool> {
        let path = self.entry_path(key).await?;
        let envelope = Envelope {
            value,
            lifetime: ttl,
        };
        let bytes =
            serde_json::to_vec(&envelope).map_err(|e| CacheError::Serialization(e.to_string()))?;
        fs::write(&path, bytes).await?;
        Ok(true)
    }

    async fn load(&self, key: &str) -> CacheResult<Option<String>> {
        let path = self.entry_path(key).await?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Corrupt entry: self-heal by dropping it.
                warn!(key = %key, "Discarding unreadable cache entry: {e}");
                Self::remove_quietly(&path).await;
                return Ok(None);
            }
        };

        if envelope.lifetime > 0 {
            let mtime = fs::metadata(&path).await?.modified()?;
            let age = SystemTime::now()
                .duration_since(mtime)
                .unwrap_or_default()
                .as_secs_f64();
            if age >= envelope.lifetime as f64 {
                Self::remove_quietly(&path).await;
                return Ok(None);
            }
        }

        Ok(Some(envelope.value))
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let path = self.entry_path(key).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_all(&self) -> CacheResult<bool> {
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
        }
        Ok(true)
    }

    async fn stats(&self) -> CacheResult<StatsSnapshot> {
        let mut entries = 0u64;
        let mut bytes = 0u64;
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some()
                && path
                    .to_string_lossy()
                    .ends_with(self.extension.as_str())
                && entry.file_type().await?.is_file()
            {
                entries += 1;
                bytes += entry.metadata().await?.len();
            }
        }
        Ok(StatsSnapshot {
            entries: Some(entries),
            mem_bytes: Some(bytes),
            ..Default::default()
        })
    }
}

/// The plain file driver accepts tag calls but performs nothing: tagging
/// needs the symlink index of the advanced file driver.
#[async_trait]
impl TagIndex for FileDriver {
    async fn tag_key(&self, _tags: &[&str], _key: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn flush_by_tags(&self, _tags: &[&str]) -> CacheResult<u64> {
        Ok(0)
    }

    async fn keys_by_tags(&self, _tags: &[&str]) -> CacheResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn clear_tags(&self, _tags: &[&str]) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn driver() -> (tempfile::TempDir, FileDriver) {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileDriver::new(dir.path(), ".cache").await.unwrap();
        (dir, driver)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_dir, driver) = driver().await;

        assert!(driver.store("p42", "\"widget\"".into(), 60).await.unwrap());
        let value = driver.load("p42").await.unwrap();
        assert_eq!(value.as_deref(), Some("\"widget\""));

        assert!(driver.delete("p42").await.unwrap());
        assert_eq!(driver.load("p42").await.unwrap(), None);
        assert!(!driver.delete("p42").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_lifetime_never_expires() {
        let (_dir, driver) = driver().await;
        driver.store("pin", "1".into(), 0).await.unwrap();
        assert_eq!(driver.load("pin").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_negative_lifetime_never_expires() {
        let (_dir, driver) = driver().await;
        driver.store("journal", "1".into(), -1).await.unwrap();
        assert_eq!(driver.load("journal").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_expiry_lazy_deletes_file() {
        let (_dir, driver) = driver().await;
        driver.store("short", "1".into(), 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
        assert_eq!(driver.load("short").await.unwrap(), None);
        // The stale file itself is gone, not just hidden.
        assert!(!driver.entry_path("short").await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_path_traversal_refused() {
        let (_dir, driver) = driver().await;
        assert!(driver.store("../evil", "x".into(), 0).await.is_err());
        assert!(driver.store("a/../../evil", "x".into(), 0).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_entry_self_heals() {
        let (_dir, driver) = driver().await;
        let path = driver.entry_path("bad").await.unwrap();
        fs::write(&path, b"not json").await.unwrap();
        assert_eq!(driver.load("bad").await.unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_delete_all_keeps_root() {
        let (_dir, driver) = driver().await;
        driver.store("a", "1".into(), 0).await.unwrap();
        driver.store("b", "2".into(), 0).await.unwrap();
        assert!(driver.delete_all().await.unwrap());
        assert!(driver.root().exists());
        assert_eq!(driver.load("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_probe_and_self_test() {
        let (_dir, driver) = driver().await;
        assert!(driver.probe().await);
        assert!(driver.self_test().await);
    }

    #[tokio::test]
    async fn test_stats_counts_entries() {
        let (_dir, driver) = driver().await;
        driver.store("a", "1".into(), 0).await.unwrap();
        driver.store("b", "22".into(), 0).await.unwrap();
        let stats = driver.stats().await.unwrap();
        assert_eq!(stats.entries, Some(2));
        assert!(stats.mem_bytes.unwrap() > 0);
        assert_eq!(stats.hits, None);
    }
}
