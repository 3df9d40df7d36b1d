//! Per-job conversion sequence.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheError, CacheKey, CacheManager};
use crate::config::Config;
use crate::error::ConversionError;
use crate::events::{ConversionEvent, EventHandle};
use crate::format::{FormatDetector, FormatId};
use crate::lock::{LockError, LockGuard, LockManager};
use crate::metrics;
use crate::retry::RetryExecutor;
use crate::stats::StatsCollector;
use crate::strategy::{ConversionStrategy, StrategyRegistry, StrategyRunner};

use super::types::{ConversionRequest, ConversionResult, ConversionStatus};

/// Runs one conversion request from validation to result.
///
/// The sequence is: validate the input, take its lease, consult the cache,
/// and only on a miss detect the source format, resolve a strategy, execute
/// with retries and store the artifact; then record statistics. The lease is released on every path out.
pub struct ConversionProcessor {
    detector: FormatDetector,
    registry: Arc<StrategyRegistry>,
    runner: StrategyRunner,
    retry: RetryExecutor,
    locks: LockManager,
    cache: Option<CacheManager>,
    cache_salt: String,
    max_input_bytes: u64,
    stats: Option<StatsCollector>,
    events: Option<EventHandle>,
}

impl ConversionProcessor {
    pub fn new(config: &Config, registry: Arc<StrategyRegistry>, detector: FormatDetector) -> Self {
        Self {
            detector,
            registry,
            runner: StrategyRunner::new(&config.work_dir, config.scheduler.timeout()),
            retry: RetryExecutor::new(config.retry.clone()),
            locks: LockManager::from_config(&config.lock),
            cache: config
                .cache
                .enabled
                .then(|| CacheManager::from_config(&config.cache)),
            cache_salt: config.cache.key_salt.clone(),
            max_input_bytes: config.limits.max_input_bytes,
            stats: None,
            events: None,
        }
    }

    /// Sets the collector that receives every non-dry-run result.
    pub fn with_stats(mut self, stats: StatsCollector) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Sets the event handle for logging conversion events.
    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn cache(&self) -> Option<&CacheManager> {
        self.cache.as_ref()
    }

    async fn emit(&self, event: ConversionEvent) {
        if let Some(ref events) = self.events {
            events.emit(event).await;
        }
    }

    /// Processes one request. Never fails: errors are reported in the result.
    pub async fn process(
        &self,
        job_id: &str,
        request: &ConversionRequest,
        cancel: &CancellationToken,
    ) -> ConversionResult {
        let start = Instant::now();
        let mut result = ConversionResult::new(job_id, request);

        self.emit(ConversionEvent::ConversionStarted {
            job_id: job_id.to_string(),
            input: request.input_path.display().to_string(),
            target: request.target.to_string(),
        })
        .await;

        let outcome = if cancel.is_cancelled() {
            Err(ConversionError::Cancelled)
        } else {
            self.run(request, &mut result, cancel).await
        };

        result.duration_secs = start.elapsed().as_secs_f64();
        match outcome {
            Ok(status) => result.status = status,
            Err(e) => result = result.with_error(&e),
        }
        self.finish(&result).await;
        result
    }

    /// Validation and locking around the locked section.
    async fn run(
        &self,
        request: &ConversionRequest,
        result: &mut ConversionResult,
        cancel: &CancellationToken,
    ) -> Result<ConversionStatus, ConversionError> {
        let input = request.input_path.as_path();
        result.input_size = self.validate(input, &result.output_path).await?;

        let guard = match self.locks.try_acquire(input).await {
            Ok(guard) => guard,
            Err(e @ LockError::Contention { .. }) => {
                self.emit(ConversionEvent::LockContended {
                    job_id: result.job_id.clone(),
                    input: input.display().to_string(),
                })
                .await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        if guard.reclaimed() {
            self.emit(ConversionEvent::LeaseReclaimed {
                job_id: result.job_id.clone(),
                input: input.display().to_string(),
            })
            .await;
        }

        let outcome = self.locked(request, result, &guard, cancel).await;

        if let Err(e) = guard.release().await {
            warn!("Failed to release lease on {}: {}", input.display(), e);
        }
        outcome
    }

    /// Checks the input exists, is a regular file within the size limit, and
    /// is not also the destination. Returns its size.
    async fn validate(&self, input: &Path, output: &Path) -> Result<u64, ConversionError> {
        let metadata = match tokio::fs::metadata(input).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::validation(input, "file does not exist"));
            }
            Err(e) => {
                return Err(ConversionError::validation(
                    input,
                    format!("cannot read metadata: {}", e),
                ));
            }
        };
        if !metadata.is_file() {
            return Err(ConversionError::validation(input, "not a regular file"));
        }
        if metadata.len() > self.max_input_bytes {
            return Err(ConversionError::validation(
                input,
                format!(
                    "{} bytes exceeds the {} byte limit",
                    metadata.len(),
                    self.max_input_bytes
                ),
            ));
        }
        if let Err(e) = tokio::fs::File::open(input).await {
            return Err(ConversionError::validation(input, format!("unreadable: {}", e)));
        }

        let same_file = match (
            tokio::fs::canonicalize(input).await,
            tokio::fs::canonicalize(output).await,
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same_file {
            return Err(ConversionError::validation(
                input,
                "output path would overwrite the input",
            ));
        }

        Ok(metadata.len())
    }

    /// Everything that happens while holding the input's lease.
    async fn locked(
        &self,
        request: &ConversionRequest,
        result: &mut ConversionResult,
        guard: &LockGuard,
        cancel: &CancellationToken,
    ) -> Result<ConversionStatus, ConversionError> {
        let input = guard.subject();
        let output = result.output_path.clone();

        if request.dry_run {
            self.plan(request, result).await?;
            return Ok(ConversionStatus::Planned);
        }

        let key = match self.cache {
            Some(_) => Some(
                CacheKey::for_input(
                    input,
                    &request.options,
                    request.source_format.as_ref(),
                    request.target.clone(),
                    &self.cache_salt,
                )
                .await?,
            ),
            None => None,
        };

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if self.restore_cached(cache, key, &output).await {
                result.cache_hit = true;
                // Only feeds the per-pair statistics; no strategy is needed.
                match self.source_format(request).await {
                    Ok(source) => result.source_format = Some(source),
                    Err(e) => debug!("No source format for cached {}: {}", input.display(), e),
                }
                self.emit(ConversionEvent::CacheHit {
                    job_id: result.job_id.clone(),
                    key: key.to_string(),
                })
                .await;
                return Ok(ConversionStatus::Success);
            }
        }

        let strategy = self.plan(request, result).await?;

        let outcome = self
            .retry
            .execute(cancel, |attempt| {
                if attempt > 1 {
                    debug!("Attempt {} for {}", attempt, request.input_path.display());
                }
                self.runner
                    .run(&strategy, input, &output, &request.options, cancel)
            })
            .await;
        result.attempts = outcome.attempts;
        outcome.result?;

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Err(e) = cache.store(key, &output).await {
                warn!("Failed to cache {}: {}", output.display(), e);
            }
        }

        Ok(ConversionStatus::Success)
    }

    /// Detects the source format and resolves a strategy for it.
    async fn plan(
        &self,
        request: &ConversionRequest,
        result: &mut ConversionResult,
    ) -> Result<ConversionStrategy, ConversionError> {
        let source = self.source_format(request).await?;
        debug!("{} detected as {}", request.input_path.display(), source);
        result.source_format = Some(source.clone());

        let strategy = self.registry.resolve(&source, &request.target)?;
        result.strategy = Some(strategy.describe());
        debug!("Strategy for {}: {}", request.input_path.display(), strategy.describe());
        Ok(strategy)
    }

    async fn source_format(&self, request: &ConversionRequest) -> Result<FormatId, ConversionError> {
        if let Some(ref format) = request.source_format {
            return Ok(format.clone());
        }
        self.detector
            .detect(&request.input_path)
            .await?
            .map(|detection| detection.format)
            .ok_or_else(|| ConversionError::FormatUnknown {
                path: request.input_path.clone(),
            })
    }

    /// Copies a live cache entry to `output`. Cache trouble is never fatal:
    /// it only means the conversion runs again.
    async fn restore_cached(&self, cache: &CacheManager, key: &CacheKey, output: &Path) -> bool {
        let entry = match cache.lookup(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return false,
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                return false;
            }
        };
        match cache.restore(&entry, output).await {
            Ok(()) => true,
            Err(CacheError::EntryMissing { .. }) => false,
            Err(e) => {
                warn!("Failed to restore cached {}: {}", key, e);
                false
            }
        }
    }

    /// Metrics, statistics, events and the per-file log line.
    async fn finish(&self, result: &ConversionResult) {
        let strategy_label = match (&result.status, result.cache_hit, result.strategy.as_deref()) {
            (_, true, _) => "cached",
            (_, _, Some("identity")) => "identity",
            (_, _, Some(s)) if s.contains(", ") => "chain",
            (_, _, Some(_)) => "direct",
            _ => "none",
        };

        match result.status {
            ConversionStatus::Success => {
                metrics::CONVERSIONS_TOTAL.with_label_values(&["success"]).inc();
                metrics::BYTES_PROCESSED.inc_by(result.input_size);
                metrics::CONVERSION_DURATION
                    .with_label_values(&[strategy_label])
                    .observe(result.duration_secs);
                info!(
                    "Converted {} -> {} ({}{}, {:.2}s)",
                    result.input_path.display(),
                    result.output_path.display(),
                    result.strategy.as_deref().unwrap_or("-"),
                    if result.cache_hit { ", cached" } else { "" },
                    result.duration_secs
                );
                self.emit(ConversionEvent::ConversionSucceeded {
                    job_id: result.job_id.clone(),
                    input: result.input_path.display().to_string(),
                    output: result.output_path.display().to_string(),
                    strategy: result.strategy.clone().unwrap_or_default(),
                    attempts: result.attempts,
                    cache_hit: result.cache_hit,
                    duration_ms: (result.duration_secs * 1000.0) as u64,
                })
                .await;
            }
            ConversionStatus::Failure => {
                let kind = result.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
                metrics::CONVERSIONS_TOTAL.with_label_values(&["failure"]).inc();
                metrics::CONVERSION_FAILURES.with_label_values(&[kind]).inc();
                error!(
                    "Failed to convert {} to {}: {}",
                    result.input_path.display(),
                    result.target,
                    result.error.as_deref().unwrap_or(kind)
                );
                self.emit(ConversionEvent::ConversionFailed {
                    job_id: result.job_id.clone(),
                    input: result.input_path.display().to_string(),
                    target: result.target.to_string(),
                    error_kind: kind.to_string(),
                    error: result.error.clone().unwrap_or_default(),
                    attempts: result.attempts,
                })
                .await;
            }
            ConversionStatus::Planned => {
                metrics::CONVERSIONS_TOTAL.with_label_values(&["planned"]).inc();
                info!(
                    "Planned {} -> {}: {}",
                    result.input_path.display(),
                    result.output_path.display(),
                    result.strategy.as_deref().unwrap_or("-")
                );
            }
        }

        if result.status != ConversionStatus::Planned {
            if let Some(ref stats) = self.stats {
                stats.record(result).await;
            }
        }
    }
}
