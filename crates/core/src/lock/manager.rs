//! Per-input mutual exclusion through lease files.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::lease::{
    create_lease_file, overwrite_lease_file, read_lease_file, read_lease_file_sync, Lease,
};
use super::LockError;
use crate::config::LockConfig;
use crate::metrics;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grants exclusive, time-bounded ownership of input paths.
///
/// Each subject gets a lease file `{dir}/{md5(canonical path)}.lock`, created
/// with exclusive-create semantics. Holders renew their lease by heartbeat;
/// a lease whose expiry has passed belongs to a dead owner and is reclaimed
/// by the next acquirer.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    lease_duration: Duration,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>, lease_duration: Duration) -> Self {
        Self {
            dir: dir.into(),
            lease_duration,
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(&config.dir, Duration::from_secs(config.lease_secs))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical form of `path` used as the lock subject.
    pub async fn subject(path: &Path) -> PathBuf {
        match tokio::fs::canonicalize(path).await {
            Ok(canonical) => canonical,
            Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
        }
    }

    /// Stable hash of the input path (not its content).
    pub fn subject_hash(subject: &Path) -> String {
        format!(
            "{:x}",
            md5::compute(subject.to_string_lossy().as_bytes())
        )
    }

    fn lock_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", hash))
    }

    /// Current lease on `path`, if any file exists for it.
    pub async fn holder(&self, path: &Path) -> Option<Lease> {
        let hash = Self::subject_hash(&Self::subject(path).await);
        read_lease_file(&self.lock_path(&hash)).await.ok().flatten()
    }

    /// Takes the lease on `path` or fails immediately with
    /// [`LockError::Contention`] when a live lease exists.
    pub async fn try_acquire(&self, path: &Path) -> Result<LockGuard, LockError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let subject = Self::subject(path).await;
        let hash = Self::subject_hash(&subject);
        let lock_path = self.lock_path(&hash);
        let lease = Lease::new(hash, subject.clone(), self.lease_duration);

        match create_lease_file(&lock_path, &lease).await {
            Ok(()) => return Ok(self.guard(lock_path, lease, false)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        if !self.reclaim_if_stale(&lock_path).await? {
            metrics::LOCK_CONTENTIONS.inc();
            return Err(LockError::Contention { path: subject });
        }

        match create_lease_file(&lock_path, &lease).await {
            Ok(()) => Ok(self.guard(lock_path, lease, true)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                metrics::LOCK_CONTENTIONS.inc();
                Err(LockError::Contention { path: subject })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Polls [`try_acquire`](Self::try_acquire) until it succeeds or
    /// `max_wait` elapses.
    pub async fn acquire_wait(&self, path: &Path, max_wait: Duration) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.try_acquire(path).await {
                Err(LockError::Contention { .. }) if Instant::now() < deadline => {
                    sleep(WAIT_POLL_INTERVAL).await;
                }
                other => return other,
            }
        }
    }

    /// Removes the lease at `lock_path` if its owner is gone. Returns whether
    /// the way is clear for a new exclusive create.
    ///
    /// Reclaimers serialize on a `.reclaim` marker so that only one of them
    /// can move a stale lease aside; the others see contention.
    async fn reclaim_if_stale(&self, lock_path: &Path) -> Result<bool, LockError> {
        if !self.is_stale(lock_path).await? {
            return Ok(false);
        }

        let marker = lock_path.with_extension("reclaim");
        let marker_lease = Lease::new(String::new(), lock_path.to_path_buf(), self.lease_duration);
        match create_lease_file(&marker, &marker_lease).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // A reclaimer that died mid-way leaves its marker behind.
                if file_age(&marker).await.is_some_and(|age| age > self.lease_duration) {
                    let _ = tokio::fs::remove_file(&marker).await;
                }
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let result = async {
            // Re-check under the marker: the lease may have been replaced.
            if !self.is_stale(lock_path).await? {
                return Ok(false);
            }
            let aside = lock_path.with_extension(format!("stale.{}", &marker_lease.owner_token[..8]));
            match tokio::fs::rename(lock_path, &aside).await {
                Ok(()) => {
                    let previous = read_lease_file(&aside).await.ok().flatten();
                    let _ = tokio::fs::remove_file(&aside).await;
                    warn!(
                        "Reclaimed stale lease {} (previous owner pid {:?})",
                        lock_path.display(),
                        previous.map(|l| l.pid)
                    );
                    metrics::LEASES_RECLAIMED.inc();
                    Ok(true)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(LockError::from(e)),
            }
        }
        .await;

        let _ = tokio::fs::remove_file(&marker).await;
        result
    }

    /// Whether the lease file is absent, expired, or unreadable for longer
    /// than a full lease period.
    async fn is_stale(&self, lock_path: &Path) -> Result<bool, LockError> {
        match read_lease_file(lock_path).await {
            Ok(Some(lease)) => Ok(!lease.is_live(Utc::now())),
            Ok(None) => Ok(file_age(lock_path)
                .await
                .is_some_and(|age| age > self.lease_duration)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn guard(&self, lock_path: PathBuf, lease: Lease, reclaimed: bool) -> LockGuard {
        debug!("Acquired lease on {}", lease.subject.display());
        let stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat(
            lock_path.clone(),
            lease.clone(),
            self.lease_duration,
            stop.clone(),
        ));
        LockGuard {
            lock_path,
            lease,
            stop,
            heartbeat: Some(heartbeat),
            reclaimed,
            released: false,
        }
    }
}

async fn file_age(path: &Path) -> Option<Duration> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Renews the lease every third of its duration until stopped, or until the
/// lease file no longer carries our token.
async fn heartbeat(lock_path: PathBuf, mut lease: Lease, duration: Duration, stop: CancellationToken) {
    let interval = duration / 3;
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = sleep(interval) => {}
        }

        match read_lease_file(&lock_path).await {
            Ok(Some(current)) if current.owner_token == lease.owner_token => {}
            _ => {
                warn!("Lease on {} was lost", lease.subject.display());
                return;
            }
        }
        lease.renew(duration);
        if let Err(e) = overwrite_lease_file(&lock_path, &lease).await {
            warn!("Failed to renew lease on {}: {}", lease.subject.display(), e);
        }
    }
}

/// Exclusive ownership of one input path.
///
/// Call [`release`](Self::release) when done; dropping an unreleased guard
/// releases it synchronously, so cancelled or panicking jobs still give the
/// input back. The lease file is removed only if it still carries this
/// guard's token.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
    lease: Lease,
    stop: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
    reclaimed: bool,
    released: bool,
}

impl LockGuard {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Whether this guard took over a stale lease.
    pub fn reclaimed(&self) -> bool {
        self.reclaimed
    }

    /// The locked input path.
    pub fn subject(&self) -> &Path {
        &self.lease.subject
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.stop.cancel();
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.await;
        }

        match read_lease_file(&self.lock_path).await {
            Ok(Some(current)) if current.owner_token == self.lease.owner_token => {
                tokio::fs::remove_file(&self.lock_path).await?;
                debug!("Released lease on {}", self.lease.subject.display());
                Ok(())
            }
            Ok(_) => {
                warn!(
                    "Lease on {} is held by another owner; leaving it",
                    self.lease.subject.display()
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stop.cancel();
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if let Ok(Some(current)) = read_lease_file_sync(&self.lock_path) {
            if current.owner_token == self.lease.owner_token {
                let _ = std::fs::remove_file(&self.lock_path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    async fn setup(lease: Duration) -> (TempDir, LockManager, PathBuf) {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.pdf");
        tokio::fs::write(&input, b"%PDF").await.unwrap();
        let manager = LockManager::new(dir.path().join("locks"), lease);
        (dir, manager, input)
    }

    #[tokio::test]
    async fn test_second_acquire_is_contended() {
        let (_dir, manager, input) = setup(Duration::from_secs(60)).await;

        let guard = assert_ok!(manager.try_acquire(&input).await);
        let err = assert_err!(manager.try_acquire(&input).await);
        assert!(matches!(err, LockError::Contention { .. }));

        assert_ok!(guard.release().await);
        let again = assert_ok!(manager.try_acquire(&input).await);
        assert_ok!(again.release().await);
    }

    #[tokio::test]
    async fn test_same_file_through_different_paths() {
        let (dir, manager, input) = setup(Duration::from_secs(60)).await;
        let indirect = dir.path().join(".").join("input.pdf");

        let _guard = manager.try_acquire(&input).await.unwrap();
        assert!(manager.try_acquire(&indirect).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let (_dir, manager, input) = setup(Duration::from_secs(60)).await;
        {
            let _guard = manager.try_acquire(&input).await.unwrap();
            assert!(manager.holder(&input).await.is_some());
        }
        assert!(manager.holder(&input).await.is_none());
        assert!(manager.try_acquire(&input).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let (_dir, manager, input) = setup(Duration::from_secs(60)).await;
        tokio::fs::create_dir_all(manager.dir()).await.unwrap();

        let subject = LockManager::subject(&input).await;
        let hash = LockManager::subject_hash(&subject);
        let mut dead = Lease::new(hash.clone(), subject, Duration::from_secs(60));
        dead.pid = 999_999;
        dead.expires_at = Utc::now() - chrono::Duration::seconds(5);
        create_lease_file(&manager.lock_path(&hash), &dead).await.unwrap();

        let guard = manager.try_acquire(&input).await.unwrap();
        assert!(guard.reclaimed());
        assert_ne!(guard.lease().owner_token, dead.owner_token);
        assert_eq!(guard.lease().pid, std::process::id());
    }

    #[tokio::test]
    async fn test_fresh_corrupt_lease_is_respected() {
        let (_dir, manager, input) = setup(Duration::from_secs(60)).await;
        tokio::fs::create_dir_all(manager.dir()).await.unwrap();
        let hash = LockManager::subject_hash(&LockManager::subject(&input).await);
        tokio::fs::write(manager.lock_path(&hash), b"").await.unwrap();

        assert!(matches!(
            manager.try_acquire(&input).await,
            Err(LockError::Contention { .. })
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_extends_lease() {
        let (_dir, manager, input) = setup(Duration::from_millis(300)).await;

        let guard = manager.try_acquire(&input).await.unwrap();
        let initial = guard.lease().expires_at;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let current = manager.holder(&input).await.unwrap();
        assert_eq!(current.owner_token, guard.lease().owner_token);
        assert!(current.expires_at > initial);
        // Still live well past the original expiry
        assert!(manager.try_acquire(&input).await.is_err());
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_keeps_foreign_lease() {
        let (_dir, manager, input) = setup(Duration::from_secs(60)).await;
        let guard = manager.try_acquire(&input).await.unwrap();

        let mut foreign = guard.lease().clone();
        foreign.owner_token = "someone-else".to_string();
        overwrite_lease_file(&guard.lock_path, &foreign).await.unwrap();

        guard.release().await.unwrap();
        assert_eq!(
            manager.holder(&input).await.unwrap().owner_token,
            "someone-else"
        );
    }

    #[tokio::test]
    async fn test_acquire_wait_until_released() {
        let (_dir, manager, input) = setup(Duration::from_secs(60)).await;
        let guard = manager.try_acquire(&input).await.unwrap();

        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            guard.release().await.unwrap();
        });

        let waited = manager
            .acquire_wait(&input, Duration::from_secs(5))
            .await
            .unwrap();
        waited.release().await.unwrap();

        let _held = manager.try_acquire(&input).await.unwrap();
        assert!(matches!(
            manager.acquire_wait(&input, Duration::from_millis(200)).await,
            Err(LockError::Contention { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let (_dir, manager, input) = setup(Duration::from_secs(60)).await;
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let input = input.clone();
                tokio::spawn(async move { manager.try_acquire(&input).await })
            })
            .collect();

        let mut guards = Vec::new();
        for handle in handles {
            if let Ok(guard) = handle.await.unwrap() {
                guards.push(guard);
            }
        }
        assert_eq!(guards.len(), 1);
    }
}
