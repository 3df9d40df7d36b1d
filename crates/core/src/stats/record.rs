use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::processor::{ConversionResult, ConversionStatus};

/// Outcomes for one `src_to_dst` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairStats {
    pub success: u64,
    pub failure: u64,
}

/// Aggregate over every recorded conversion, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    /// Successful conversions, cache hits included.
    #[serde(default)]
    pub conversions: u64,
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub cache_hits: u64,
    /// Input bytes of successful conversions.
    #[serde(default)]
    pub total_size: u64,
    /// Seconds spent on recorded conversions.
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub format_stats: BTreeMap<String, PairStats>,
}

impl StatsRecord {
    /// Folds one result into the aggregate. Dry runs are ignored.
    pub fn record(&mut self, result: &ConversionResult) {
        let succeeded = match result.status {
            ConversionStatus::Planned => return,
            ConversionStatus::Success => true,
            ConversionStatus::Failure => false,
        };

        if succeeded {
            self.conversions += 1;
            self.total_size += result.input_size;
            if result.cache_hit {
                self.cache_hits += 1;
            }
        } else {
            self.failures += 1;
        }
        self.total_time += result.duration_secs;

        if let Some(pair) = result.format_pair() {
            let entry = self.format_stats.entry(pair.stats_key()).or_default();
            if succeeded {
                entry.success += 1;
            } else {
                entry.failure += 1;
            }
        }
    }

    /// Adds another aggregate into this one.
    pub fn merge(&mut self, other: &StatsRecord) {
        self.conversions += other.conversions;
        self.failures += other.failures;
        self.cache_hits += other.cache_hits;
        self.total_size += other.total_size;
        self.total_time += other.total_time;
        for (pair, stats) in &other.format_stats {
            let entry = self.format_stats.entry(pair.clone()).or_default();
            entry.success += stats.success;
            entry.failure += stats.failure;
        }
    }

    pub fn total(&self) -> u64 {
        self.conversions + self.failures
    }

    /// Share of recorded conversions that succeeded, in `0.0..=1.0`.
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.conversions as f64 / total as f64,
        }
    }

    /// Reads a stats file. Missing files start from zero; unreadable ones
    /// are logged and also start from zero.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("Ignoring corrupt stats file {}: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    /// Writes the aggregate to `path` through a temp file and rename.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let temp = path.with_extension(format!("{}.tmp", std::process::id()));
        tokio::fs::write(&temp, json).await?;
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }
}
