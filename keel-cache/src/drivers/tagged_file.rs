//! Filesystem driver with a symlink-based tag index.
//!
//! Entries are stored exactly like the plain file driver. The tag index is
//! a directory tree: the tag string is split on `_` into path segments, the
//! segments become nested directories under the cache root, and the deepest
//! directory holds one symlink per tagged entry, named after the entry key
//! and pointing at the real cache file.

use crate::drivers::file::FileDriver;
use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheDriver, DriverKind, Lifetime, StatsSnapshot, TagIndex};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// File cache with symlink tag index.
#[derive(Clone)]
pub struct TaggedFileDriver {
    inner: FileDriver,
}

impl TaggedFileDriver {
    /// Create a driver rooted at `dir`, creating it if needed.
    pub async fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> CacheResult<Self> {
        Ok(Self {
            inner: FileDriver::new(dir, extension).await?,
        })
    }

    /// Resolve the index directory for a tag. Every `_`-separated segment
    /// must be non-empty.
    fn tag_dir(&self, tag: &str) -> CacheResult<PathBuf> {
        let mut dir = self.inner.root().to_path_buf();
        for segment in tag.split('_') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(CacheError::Config(format!("invalid tag segment in: {tag}")));
            }
            dir.push(segment);
        }
        Ok(dir)
    }

    /// Breadth-first collection of a tag subtree: every symlink in it, and
    /// every directory ordered parents-first (so reversing gives a safe
    /// children-before-parents removal order).
    async fn walk(dir: &Path) -> CacheResult<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut dirs = vec![dir.to_path_buf()];
        let mut links = Vec::new();
        let mut i = 0;
        while i < dirs.len() {
            let current = dirs[i].clone();
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    dirs.push(entry.path());
                } else if file_type.is_symlink() {
                    links.push(entry.path());
                }
            }
            i += 1;
        }
        Ok((links, dirs))
    }
}

#[async_trait]
impl CacheDriver for TaggedFileDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::AdvancedFile
    }

    async fn probe(&self) -> bool {
        self.inner.probe().await
    }

    /// The usual round trip, plus a symlink/readlink round trip: some
    /// environments disable `symlink()`, and that must surface as
    /// unavailable here instead of failing every tag write later.
    async fn self_test(&self) -> bool {
        if !self.inner.self_test().await {
            return false;
        }

        let target = self.inner.root().join(".keel_symlink_target");
        let link = self.inner.root().join(".keel_symlink_probe");
        let ok = async {
            fs::write(&target, b"probe").await?;
            fs::symlink(&target, &link).await?;
            let resolved = fs::read_link(&link).await?;
            Ok::<bool, std::io::Error>(resolved == target)
        }
        .await
        .unwrap_or_else(|e| {
            warn!(root = ?self.inner.root(), "Symlink self test failed: {e}");
            false
        });

        let _ = fs::remove_file(&link).await;
        let _ = fs::remove_file(&target).await;
        ok
    }

    async fn store(&self, key: &str, value: String, ttl: Lifetime) -> CacheResult<bool> {
        self.inner.store(key, value, ttl).await
    }

    async fn load(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.load(key).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.inner.delete(key).await
    }

    async fn delete_all(&self) -> CacheResult<bool> {
        // Removes entry files and the whole tag tree in one sweep.
        self.inner.delete_all().await
    }

    async fn stats(&self) -> CacheResult<StatsSnapshot> {
        self.inner.stats().await
    }
}

#[async_trait]
impl TagIndex for TaggedFileDriver {
    async fn tag_key(&self, tags: &[&str], key: &str) -> CacheResult<bool> {
        let target = self.inner.entry_path(key).await?;
        let mut all_ok = true;

        for tag in tags {
            let dir = match self.tag_dir(tag) {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(tag = %tag, "Skipping tag: {e}");
                    all_ok = false;
                    continue;
                }
            };

            // Cannot tag a non-existent entry.
            if !fs::try_exists(&target).await.unwrap_or(false) {
                all_ok = false;
                continue;
            }

            if let Err(e) = fs::create_dir_all(&dir).await {
                warn!(tag = %tag, "Failed to create tag directory: {e}");
                all_ok = false;
                continue;
            }

            let link = dir.join(key);
            if let Err(e) = fs::symlink(&target, &link).await {
                // Includes the already-tagged case (link exists).
                debug!(tag = %tag, key = %key, "Symlink not created: {e}");
                all_ok = false;
            }
        }

        Ok(all_ok)
    }

    /// Counts only deleted entry files, not removed symlinks.
    async fn flush_by_tags(&self, tags: &[&str]) -> CacheResult<u64> {
        let mut deleted = 0u64;

        for tag in tags {
            let dir = match self.tag_dir(tag) {
                Ok(dir) => dir,
                Err(_) => continue,
            };
            if !fs::try_exists(&dir).await.unwrap_or(false) {
                continue;
            }

            let (links, dirs) = Self::walk(&dir).await?;

            for link in links {
                if let Ok(target) = fs::read_link(&link).await {
                    if fs::remove_file(&target).await.is_ok() {
                        deleted += 1;
                    }
                }
                let _ = fs::remove_file(&link).await;
            }

            // Children before parents; the tag's own root goes last.
            for dir in dirs.iter().rev() {
                if let Err(e) = fs::remove_dir(dir).await {
                    warn!(dir = ?dir, "Failed to remove tag directory: {e}");
                }
            }

            // Multi-segment tags leave a chain of parent directories above
            // the leaf. Climb back toward the cache root, dropping each
            // now-empty segment; a non-empty parent (shared with another
            // tag) stops the climb.
            let root = self.inner.root();
            let mut parent = dir.parent();
            while let Some(p) = parent {
                if p == root || fs::remove_dir(p).await.is_err() {
                    break;
                }
                parent = p.parent();
            }
        }

        Ok(deleted)
    }

    async fn keys_by_tags(&self, tags: &[&str]) -> CacheResult<Vec<String>> {
        let mut keys = HashSet::new();

        for tag in tags {
            let dir = match self.tag_dir(tag) {
                Ok(dir) => dir,
                Err(_) => continue,
            };
            if !fs::try_exists(&dir).await.unwrap_or(false) {
                continue;
            }
            let (links, _) = Self::walk(&dir).await?;
            for link in links {
                if let Some(name) = link.file_name() {
                    keys.insert(name.to_string_lossy().into_owned());
                }
            }
        }

        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        Ok(keys)
    }

    /// Not needed for this driver: `flush_by_tags` tears the index down
    /// inline, leaving no state to clean afterwards.
    async fn clear_tags(&self, _tags: &[&str]) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn driver() -> (tempfile::TempDir, TaggedFileDriver) {
        let dir = tempfile::tempdir().unwrap();
        let driver = TaggedFileDriver::new(dir.path(), ".cache").await.unwrap();
        (dir, driver)
    }

    #[tokio::test]
    async fn test_tag_creates_symlink_tree() {
        let (dir, driver) = driver().await;
        driver.store("p42", "{\"id\":42}".into(), 0).await.unwrap();
        assert!(driver.tag_key(&["cat_5"], "p42").await.unwrap());

        let link = dir.path().join("cat").join("5").join("p42");
        let meta = std::fs::symlink_metadata(&link).unwrap();
        assert!(meta.file_type().is_symlink());
        let target = std::fs::read_link(&link).unwrap();
        assert!(target.to_string_lossy().ends_with("p42.cache"));
    }

    #[tokio::test]
    async fn test_flush_deletes_entry_and_index() {
        let (dir, driver) = driver().await;
        driver.store("p42", "{\"id\":42}".into(), 0).await.unwrap();
        driver.tag_key(&["cat_5"], "p42").await.unwrap();

        let count = driver.flush_by_tags(&["cat_5"]).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(driver.load("p42").await.unwrap(), None);
        assert!(!dir.path().join("cat").exists());
    }

    #[tokio::test]
    async fn test_flush_removes_whole_segment_chain() {
        let (dir, driver) = driver().await;
        driver.store("p1", "1".into(), 0).await.unwrap();
        driver.tag_key(&["a_b_c"], "p1").await.unwrap();
        assert!(dir.path().join("a").join("b").join("c").exists());

        driver.flush_by_tags(&["a_b_c"]).await.unwrap();
        // Every segment directory is gone, not just the leaf.
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_flush_keeps_parent_shared_with_another_tag() {
        let (dir, driver) = driver().await;
        driver.store("p1", "1".into(), 0).await.unwrap();
        driver.store("p2", "2".into(), 0).await.unwrap();
        driver.tag_key(&["cat_5"], "p1").await.unwrap();
        driver.tag_key(&["cat_9"], "p2").await.unwrap();

        driver.flush_by_tags(&["cat_5"]).await.unwrap();
        assert!(!dir.path().join("cat").join("5").exists());
        // `cat` still indexes cat_9, so the shared parent survives.
        assert!(dir.path().join("cat").join("9").join("p2").exists());
        assert_eq!(driver.load("p2").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_tag_isolation() {
        let (_dir, driver) = driver().await;
        driver.store("k1", "1".into(), 0).await.unwrap();
        driver.store("k2", "2".into(), 0).await.unwrap();
        driver.tag_key(&["a"], "k1").await.unwrap();
        driver.tag_key(&["b"], "k2").await.unwrap();

        driver.flush_by_tags(&["a"]).await.unwrap();
        assert_eq!(driver.load("k1").await.unwrap(), None);
        assert_eq!(driver.load("k2").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_flush_unknown_tag_is_zero() {
        let (_dir, driver) = driver().await;
        assert_eq!(driver.flush_by_tags(&["nope"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_excludes_dangling_symlinks() {
        let (_dir, driver) = driver().await;
        driver.store("p1", "1".into(), 0).await.unwrap();
        driver.store("p2", "2".into(), 0).await.unwrap();
        driver.tag_key(&["grp"], "p1").await.unwrap();
        driver.tag_key(&["grp"], "p2").await.unwrap();

        // p2's real file is already gone; its symlink dangles.
        driver.delete("p2").await.unwrap();

        let count = driver.flush_by_tags(&["grp"]).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_empty_segment_fails_that_tag_only() {
        let (dir, driver) = driver().await;
        driver.store("p1", "1".into(), 0).await.unwrap();

        let ok = driver.tag_key(&["bad__tag", "good"], "p1").await.unwrap();
        assert!(!ok);
        // The well-formed tag was still applied.
        assert!(dir.path().join("good").join("p1").exists());
    }

    #[tokio::test]
    async fn test_cannot_tag_missing_entry() {
        let (dir, driver) = driver().await;
        let ok = driver.tag_key(&["cat_5"], "ghost").await.unwrap();
        assert!(!ok);
        assert!(!dir.path().join("cat").join("5").join("ghost").exists());
    }

    #[tokio::test]
    async fn test_duplicate_tagging_fails_second_time() {
        let (_dir, driver) = driver().await;
        driver.store("p1", "1".into(), 0).await.unwrap();
        assert!(driver.tag_key(&["t"], "p1").await.unwrap());
        assert!(!driver.tag_key(&["t"], "p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_by_tags_dedupes() {
        let (_dir, driver) = driver().await;
        driver.store("p1", "1".into(), 0).await.unwrap();
        driver.store("p2", "2".into(), 0).await.unwrap();
        driver.tag_key(&["cat_5", "sale"], "p1").await.unwrap();
        driver.tag_key(&["cat_5"], "p2").await.unwrap();

        let keys = driver.keys_by_tags(&["cat_5", "sale"]).await.unwrap();
        assert_eq!(keys, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn test_self_test_covers_symlinks() {
        let (_dir, driver) = driver().await;
        assert!(driver.self_test().await);
    }
}
