//! Content-addressed artifact cache.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::CacheError;
use crate::config::CacheConfig;
use crate::metrics;

const TEMP_PREFIX: &str = ".tmp-";

/// Stray temp files younger than this may belong to a store in progress.
const TEMP_GRACE: Duration = Duration::from_secs(3600);

/// A stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub stored_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Outcome of [`CacheManager::prune`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub freed_bytes: u64,
    pub kept: usize,
}

/// Directory of previously produced outputs, one file per [`CacheKey`].
///
/// Entries expire `ttl` after their modification time and are evicted lazily
/// when looked up. Stores and restores go through a temp file and a rename so
/// readers never observe a partial artifact.
#[derive(Debug, Clone)]
pub struct CacheManager {
    dir: PathBuf,
    ttl: Duration,
}

impl CacheManager {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.dir, config.ttl())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }

    /// Returns the live entry for `key`, evicting it if it has expired.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                metrics::CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let modified = metadata.modified()?;
        let entry = CacheEntry {
            key: key.clone(),
            stored_path: path,
            created_at: DateTime::<Utc>::from(modified),
            size_bytes: metadata.len(),
        };

        if self.is_expired(modified) {
            debug!("Cache entry {} expired", key);
            self.evict(&entry).await?;
            metrics::CACHE_LOOKUPS.with_label_values(&["expired"]).inc();
            return Ok(None);
        }

        metrics::CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
        Ok(Some(entry))
    }

    /// Copies `artifact` into the cache under `key`, replacing any previous
    /// entry.
    pub async fn store(&self, key: &CacheKey, artifact: &Path) -> Result<CacheEntry, CacheError> {
        let result = self.store_inner(key, artifact).await;
        let label = if result.is_ok() { "success" } else { "failure" };
        metrics::CACHE_STORES.with_label_values(&[label]).inc();
        result
    }

    async fn store_inner(&self, key: &CacheKey, artifact: &Path) -> Result<CacheEntry, CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let temp = self
            .dir
            .join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4().simple()));
        let size_bytes = match tokio::fs::copy(artifact, &temp).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e.into());
            }
        };

        let stored_path = self.entry_path(key);
        if let Err(e) = tokio::fs::rename(&temp, &stored_path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        debug!("Cached {} ({} bytes)", key, size_bytes);

        Ok(CacheEntry {
            key: key.clone(),
            stored_path,
            created_at: Utc::now(),
            size_bytes,
        })
    }

    /// Removes an entry. Already-missing entries are not an error.
    pub async fn evict(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        match tokio::fs::remove_file(&entry.stored_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Copies a cached artifact to `destination`, atomically replacing any
    /// existing file there.
    pub async fn restore(&self, entry: &CacheEntry, destination: &Path) -> Result<(), CacheError> {
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent).await?;

        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(
            ".{}.{}.restore",
            file_name,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));

        match tokio::fs::copy(&entry.stored_path, &temp).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(CacheError::EntryMissing {
                    path: entry.stored_path.clone(),
                });
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e.into());
            }
        }

        if let Err(e) = tokio::fs::rename(&temp, destination).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes every expired entry and abandoned temp file.
    pub async fn prune(&self) -> Result<PruneReport, CacheError> {
        let mut report = PruneReport::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        while let Some(dirent) = entries.next_entry().await? {
            let metadata = match dirent.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let name = dirent.file_name().to_string_lossy().into_owned();
            let modified = metadata.modified()?;

            let remove = if name.starts_with(TEMP_PREFIX) {
                SystemTime::now()
                    .duration_since(modified)
                    .map(|age| age > TEMP_GRACE)
                    .unwrap_or(false)
            } else if CacheKey::parse_file_name(&name).is_some() {
                self.is_expired(modified)
            } else {
                false
            };

            if !remove {
                report.kept += 1;
                continue;
            }
            match tokio::fs::remove_file(dirent.path()).await {
                Ok(()) => {
                    report.removed += 1;
                    report.freed_bytes += metadata.len();
                }
                Err(e) => warn!("Failed to prune {}: {}", dirent.path().display(), e),
            }
        }

        debug!(
            "Pruned {} cache files ({} bytes)",
            report.removed, report.freed_bytes
        );
        Ok(report)
    }

    /// Removes every entry regardless of age. Returns the number removed.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(dirent) = entries.next_entry().await? {
            let name = dirent.file_name().to_string_lossy().into_owned();
            if CacheKey::parse_file_name(&name).is_none() && !name.starts_with(TEMP_PREFIX) {
                continue;
            }
            if dirent.file_type().await?.is_file() {
                tokio::fs::remove_file(dirent.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ConversionOptions;
    use crate::format::FormatId;
    use tempfile::TempDir;

    fn key(seed: char, format: &str) -> CacheKey {
        CacheKey::new(
            seed.to_string().repeat(64),
            &ConversionOptions::default(),
            FormatId::new(format),
            "",
        )
    }

    async fn artifact(dir: &TempDir, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join("artifact.out");
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    fn backdate(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(60));
        let key = key('a', "txt");

        assert!(cache.lookup(&key).await.unwrap().is_none());

        let source = artifact(&dir, b"converted").await;
        let stored = cache.store(&key, &source).await.unwrap();
        assert_eq!(stored.size_bytes, 9);
        assert_eq!(stored.stored_path, cache.dir().join(key.file_name()));

        let found = cache.lookup(&key).await.unwrap().unwrap();
        assert_eq!(found.size_bytes, 9);
        assert_eq!(tokio::fs::read(&found.stored_path).await.unwrap(), b"converted");
    }

    #[tokio::test]
    async fn test_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(60));
        let source = artifact(&dir, b"x").await;

        cache.store(&key('a', "txt"), &source).await.unwrap();
        cache.store(&key('a', "txt"), &source).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(cache.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![key('a', "txt").file_name()]);
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted_on_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(60));
        let key = key('b', "pdf");
        let stored = cache.store(&key, &artifact(&dir, b"%PDF").await).await.unwrap();

        backdate(&stored.stored_path, Duration::from_secs(120));

        assert!(cache.lookup(&key).await.unwrap().is_none());
        assert!(!stored.stored_path.exists());
    }

    #[tokio::test]
    async fn test_restore_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(60));
        let key = key('c', "txt");
        let entry = cache.store(&key, &artifact(&dir, b"fresh").await).await.unwrap();

        let destination = dir.path().join("out").join("doc.txt");
        tokio::fs::create_dir_all(destination.parent().unwrap()).await.unwrap();
        tokio::fs::write(&destination, b"stale").await.unwrap();

        cache.restore(&entry, &destination).await.unwrap();
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"fresh");

        let leftovers = std::fs::read_dir(destination.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_restore_missing_entry() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(60));
        let entry = cache.store(&key('d', "txt"), &artifact(&dir, b"x").await).await.unwrap();
        cache.evict(&entry).await.unwrap();
        cache.evict(&entry).await.unwrap();

        let err = cache
            .restore(&entry, &dir.path().join("out.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::EntryMissing { .. }));
        assert!(!dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_prune_removes_expired_and_stray_temp() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(60));
        let source = artifact(&dir, b"12345").await;

        let old = cache.store(&key('e', "txt"), &source).await.unwrap();
        let fresh = cache.store(&key('f', "txt"), &source).await.unwrap();
        backdate(&old.stored_path, Duration::from_secs(600));

        let stray = cache.dir().join(".tmp-abandoned");
        tokio::fs::write(&stray, b"half").await.unwrap();
        backdate(&stray, TEMP_GRACE * 2);
        let in_progress = cache.dir().join(".tmp-writing");
        tokio::fs::write(&in_progress, b"half").await.unwrap();

        let report = cache.prune().await.unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.freed_bytes, 9);
        assert_eq!(report.kept, 2);
        assert!(fresh.stored_path.exists());
        assert!(in_progress.exists());
    }

    #[tokio::test]
    async fn test_clear_and_missing_dir() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(dir.path().join("cache"), Duration::from_secs(60));
        assert_eq!(cache.clear().await.unwrap(), 0);
        assert_eq!(cache.prune().await.unwrap(), PruneReport::default());

        let source = artifact(&dir, b"x").await;
        cache.store(&key('1', "txt"), &source).await.unwrap();
        cache.store(&key('2', "pdf"), &source).await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.lookup(&key('1', "txt")).await.unwrap().is_none());
    }
}
