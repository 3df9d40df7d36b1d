//! On-disk lease records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::time::Duration;

/// Time-bounded ownership of one input path.
///
/// A lease is live while `expires_at` lies in the future. The owner extends
/// it periodically; a crashed owner stops doing so and the lease lapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// MD5 of the canonical input path.
    pub subject_hash: String,
    pub subject: PathBuf,
    /// Random token identifying the holder.
    pub owner_token: String,
    /// Diagnostic only; liveness is decided by `expires_at`.
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(subject_hash: String, subject: PathBuf, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            subject_hash,
            subject,
            owner_token: uuid::Uuid::new_v4().to_string(),
            pid: std::process::id(),
            acquired_at: now,
            expires_at: now + to_chrono(duration),
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Pushes the expiry `duration` past now.
    pub fn renew(&mut self, duration: Duration) {
        self.expires_at = Utc::now() + to_chrono(duration);
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

/// Creates the lease file, failing with `AlreadyExists` if any lease is there.
pub(crate) async fn create_lease_file(path: &Path, lease: &Lease) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(lease)?;
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = async {
        file.write_all(&bytes).await?;
        file.sync_all().await
    }
    .await;
    if written.is_err() {
        let _ = tokio::fs::remove_file(path).await;
    }
    written
}

/// Replaces the lease file atomically.
pub(crate) async fn overwrite_lease_file(path: &Path, lease: &Lease) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(lease)?;
    let tmp = path.with_extension(format!("{}.tmp", &lease.owner_token[..8]));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Reads a lease file. `Ok(None)` means the file exists but is not a valid
/// lease (e.g. caught mid-write or corrupted).
pub(crate) async fn read_lease_file(path: &Path) -> std::io::Result<Option<Lease>> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes).ok())
}

pub(crate) fn read_lease_file_sync(path: &Path) -> std::io::Result<Option<Lease>> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes).ok())
}
