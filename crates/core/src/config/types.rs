use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::time::Duration;

use crate::adapter::CommandSpec;
use crate::format::FormatId;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
    /// Scratch root for chain intermediates.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            chain: ChainConfig::default(),
            lock: LockConfig::default(),
            detection: DetectionConfig::default(),
            limits: LimitsConfig::default(),
            stats: StatsConfig::default(),
            events: EventsConfig::default(),
            metrics: MetricsConfig::default(),
            adapters: AdaptersConfig::default(),
            work_dir: default_work_dir(),
        }
    }
}

impl Config {
    /// Points every persisted location below `root` (useful for tests).
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.cache.dir = root.join("artifacts");
        self.lock.dir = root.join("locks");
        self.stats.path = root.join("stats.json");
        self.events.path = root.join("events.db");
        self.work_dir = root.join("work");
        self
    }
}

/// Per-user data directory holding the cache, leases, stats and event log.
pub fn default_data_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("metamorph")
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("metamorph-work")
}

fn default_true() -> bool {
    true
}

/// Artifact cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Entries older than this are evicted on lookup.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Folded into every options hash; change it to invalidate the whole cache.
    #[serde(default)]
    pub key_salt: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            ttl_secs: default_cache_ttl(),
            key_salt: String::new(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_cache_dir() -> PathBuf {
    default_data_root().join("artifacts")
}

fn default_cache_ttl() -> u64 {
    7 * 24 * 3600 // 1 week
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Budget for a single adapter invocation.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Time between the termination signal and the forced kill.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout(),
            grace_period_secs: default_grace_period(),
        }
    }
}

impl SchedulerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_grace_period() -> u64 {
    5
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,

    /// Multiplier applied to the delay after each attempt (1.0 = fixed delay).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_delay() -> u64 {
    30_000
}

/// Multi-hop chaining configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Formats allowed as intermediates.
    #[serde(default = "default_hubs")]
    pub hubs: Vec<FormatId>,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hubs: default_hubs(),
            max_hops: default_max_hops(),
        }
    }
}

fn default_hubs() -> Vec<FormatId> {
    ["pdf", "html", "txt", "markdown"]
        .into_iter()
        .map(FormatId::new)
        .collect()
}

fn default_max_hops() -> usize {
    2
}

/// Input lease configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_dir")]
    pub dir: PathBuf,
    /// Lease lifetime; the owner renews it every third of this.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: default_lock_dir(),
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_lock_dir() -> PathBuf {
    default_data_root().join("locks")
}

fn default_lease_secs() -> u64 {
    60
}

/// Format detection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionConfig {
    /// Ask the `file` utility for a MIME type.
    #[serde(default = "default_true")]
    pub mime_probe: bool,
    #[serde(default = "default_file_command")]
    pub file_command: PathBuf,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mime_probe: true,
            file_command: default_file_command(),
        }
    }
}

fn default_file_command() -> PathBuf {
    PathBuf::from("file")
}

/// Input limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
        }
    }
}

fn default_max_input_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

/// Statistics persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsConfig {
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_stats_path")]
    pub path: PathBuf,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            persist: true,
            path: default_stats_path(),
        }
    }
}

fn default_stats_path() -> PathBuf {
    default_data_root().join("stats.json")
}

/// Event log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_events_path")]
    pub path: PathBuf,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_events_path(),
        }
    }
}

fn default_events_path() -> PathBuf {
    default_data_root().join("events.db")
}

/// Metrics export
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Write the Prometheus text exposition here at the end of a run.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Adapter catalog adjustments
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AdaptersConfig {
    /// Built-in adapters to leave out, by name.
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Capability score overrides, by adapter name.
    #[serde(default)]
    pub overrides: HashMap<String, i32>,
    /// Additional command adapters.
    #[serde(default)]
    pub extra: Vec<CommandSpec>,
}
