//! Worker pool implementation.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::job::{JobHandle, JobRecord};
use super::SchedulerError;
use crate::error::ConversionError;
use crate::processor::{ConversionProcessor, ConversionRequest, ConversionResult};

/// Tracks statistics for the pool.
#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub cancelled: bool,
    pub max_concurrency: usize,
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub total_processed: u64,
    pub total_failed: u64,
}

type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<JobRecord>>>;

/// Runs conversion jobs on a fixed set of worker tasks.
///
/// Jobs submitted before [`run`](Self::run) wait in the queue. Cancelling
/// the scheduler cancels every in-flight invocation; jobs still queued then
/// finish immediately as cancelled.
pub struct Scheduler {
    processor: Arc<ConversionProcessor>,
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<JobRecord>>>,
    rx: JobQueue,
    workers: Mutex<Vec<JoinHandle<()>>>,
    max_concurrency: AtomicU64,
    running: AtomicBool,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(processor: Arc<ConversionProcessor>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            processor,
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Arc::new(Mutex::new(rx)),
            workers: Mutex::new(Vec::new()),
            max_concurrency: AtomicU64::new(0),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            stats: Arc::new(PoolStats::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Token cancelled by [`cancel_all`](Self::cancel_all); parent of every job token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Starts `max_concurrency` workers.
    pub async fn run(&self, max_concurrency: usize) -> Result<(), SchedulerError> {
        if max_concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.max_concurrency
            .store(max_concurrency as u64, Ordering::SeqCst);

        let mut workers = self.workers.lock().await;
        for index in 0..max_concurrency {
            workers.push(tokio::spawn(worker(
                index,
                self.rx.clone(),
                self.processor.clone(),
                self.cancel.clone(),
                self.stats.clone(),
            )));
        }
        info!("Scheduler started with {} workers", max_concurrency);
        Ok(())
    }

    /// Queues a request. The handle resolves once a worker has processed it.
    pub fn submit(&self, request: ConversionRequest) -> Result<JobHandle, SchedulerError> {
        let job_id = format!("job-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();

        let guard = self.tx.lock().map_err(|_| SchedulerError::ShutDown)?;
        let tx = guard.as_ref().ok_or(SchedulerError::ShutDown)?;

        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        let record = JobRecord {
            job_id: job_id.clone(),
            request: request.clone(),
            reply,
            queued_at: Instant::now(),
        };
        if tx.send(record).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(SchedulerError::ShutDown);
        }
        debug!("Queued {} for {}", job_id, request.input_path.display());
        Ok(JobHandle::new(job_id, request, rx))
    }

    /// Submits every request and waits for all of them. Results are in
    /// submission order.
    pub async fn convert_all(&self, requests: Vec<ConversionRequest>) -> Vec<ConversionResult> {
        let handles: Vec<JobHandle> = requests
            .into_iter()
            .map(|request| {
                self.submit(request.clone()).unwrap_or_else(|e| {
                    let job_id = format!("job-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
                    JobHandle::rejected(job_id, request, e)
                })
            })
            .collect();
        futures::future::join_all(handles).await
    }

    /// Cancels in-flight jobs and makes queued ones fail as cancelled.
    pub fn cancel_all(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancelling all conversions");
            self.cancel.cancel();
        }
    }

    /// Stops accepting jobs, lets the workers drain the queue, and waits for
    /// them to exit. Without workers, queued jobs fail as shut down.
    pub async fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        if workers.is_empty() {
            self.reject_queued().await;
        }
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        debug!("Scheduler shut down");
    }

    async fn reject_queued(&self) {
        let mut queue = self.rx.lock().await;
        while let Ok(job) = queue.try_recv() {
            self.stats.queued.fetch_sub(1, Ordering::Relaxed);
            debug!("Rejecting {}: scheduler shut down before running", job.job_id);
            let result = ConversionResult::failed(
                job.job_id.clone(),
                &job.request,
                &ConversionError::from(SchedulerError::ShutDown),
            );
            let _ = job.reply.send(result);
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            cancelled: self.cancel.is_cancelled(),
            max_concurrency: self.max_concurrency.load(Ordering::SeqCst) as usize,
            active_jobs: self.stats.active.load(Ordering::Relaxed) as usize,
            queued_jobs: self.stats.queued.load(Ordering::Relaxed) as usize,
            total_processed: self.stats.total_processed.load(Ordering::Relaxed),
            total_failed: self.stats.total_failed.load(Ordering::Relaxed),
        }
    }
}

async fn worker(
    index: usize,
    queue: JobQueue,
    processor: Arc<ConversionProcessor>,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
) {
    debug!("Worker {} started", index);
    loop {
        let job = { queue.lock().await.recv().await };
        let Some(job) = job else { break };

        stats.queued.fetch_sub(1, Ordering::Relaxed);
        stats.active.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Worker {} picked up {} after {:?} in queue",
            index,
            job.job_id,
            job.queued_at.elapsed()
        );

        let token = cancel.child_token();
        let result = AssertUnwindSafe(processor.process(&job.job_id, &job.request, &token))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!("Job {} panicked", job.job_id);
                ConversionResult::failed(
                    job.job_id.clone(),
                    &job.request,
                    &ConversionError::Io(std::io::Error::other("conversion task panicked")),
                )
            });

        stats.active.fetch_sub(1, Ordering::Relaxed);
        stats.total_processed.fetch_add(1, Ordering::Relaxed);
        if result.is_failure() {
            stats.total_failed.fetch_add(1, Ordering::Relaxed);
        }

        // The submitter may have dropped its handle.
        let _ = job.reply.send(result);
    }
    debug!("Worker {} exiting", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ToolAdapter;
    use crate::config::Config;
    use crate::format::FormatDetector;
    use crate::strategy::StrategyRegistry;
    use crate::testing::fixtures::{test_config, write_input};
    use crate::testing::MockAdapter;
    use tempfile::TempDir;
    use tokio::time::Duration;

    async fn scheduler(config: &Config, adapter: Arc<MockAdapter>) -> Scheduler {
        let adapters: Vec<Arc<dyn ToolAdapter>> = vec![adapter];
        let registry = StrategyRegistry::discover(adapters, config.chain.clone()).await;
        let processor = ConversionProcessor::new(config, Arc::new(registry), FormatDetector::new());
        Scheduler::new(Arc::new(processor))
    }

    #[tokio::test]
    async fn test_run_rejects_bad_concurrency_and_restart() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let scheduler = scheduler(&config, Arc::new(MockAdapter::new("m", &[]))).await;

        assert!(matches!(
            scheduler.run(0).await,
            Err(SchedulerError::InvalidConcurrency)
        ));
        scheduler.run(2).await.unwrap();
        assert!(matches!(
            scheduler.run(2).await,
            Err(SchedulerError::AlreadyRunning)
        ));
        assert_eq!(scheduler.status().max_concurrency, 2);
        scheduler.shutdown().await;
        assert!(!scheduler.status().running);
    }

    #[tokio::test]
    async fn test_results_in_submission_order() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let adapter = Arc::new(MockAdapter::new("pandoc", &[("markdown", "txt")]));
        let scheduler = scheduler(&config, adapter.clone()).await;
        scheduler.run(3).await.unwrap();

        let mut requests = Vec::new();
        for i in 0..6 {
            let input = write_input(dir.path(), &format!("doc{}.md", i), format!("# Doc {}\n", i).as_bytes()).await;
            requests.push(ConversionRequest::new(input, "txt"));
        }

        let results = scheduler.convert_all(requests.clone()).await;
        assert_eq!(results.len(), 6);
        for (request, result) in requests.iter().zip(&results) {
            assert_eq!(result.input_path, request.input_path);
            assert!(result.is_success(), "{:?}", result.error);
        }

        let status = scheduler.status();
        assert_eq!(status.total_processed, 6);
        assert_eq!(status.total_failed, 0);
        assert_eq!(status.queued_jobs, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let adapter = Arc::new(MockAdapter::new("pandoc", &[("markdown", "txt")]));
        adapter.set_delay(Duration::from_millis(50)).await;
        let scheduler = scheduler(&config, adapter.clone()).await;
        scheduler.run(2).await.unwrap();

        let mut requests = Vec::new();
        for i in 0..8 {
            let input = write_input(dir.path(), &format!("n{}.md", i), format!("note {}\n", i).as_bytes()).await;
            requests.push(ConversionRequest::new(input, "txt"));
        }
        let results = scheduler.convert_all(requests).await;

        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(adapter.invocation_count().await, 8);
        assert!(adapter.peak_concurrency() <= 2);
        assert!(adapter.peak_concurrency() >= 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_all_fails_in_flight_and_queued() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let adapter = Arc::new(MockAdapter::new("pandoc", &[("markdown", "txt")]));
        adapter.set_delay(Duration::from_secs(30)).await;
        let scheduler = scheduler(&config, adapter.clone()).await;
        scheduler.run(1).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let input = write_input(dir.path(), &format!("slow{}.md", i), b"# slow\n").await;
            handles.push(scheduler.submit(ConversionRequest::new(input, "txt")).unwrap());
        }

        while adapter.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        scheduler.cancel_all();

        let results = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(handles))
            .await
            .unwrap();
        for result in &results {
            assert_eq!(result.error_kind, Some(crate::error::ErrorKind::Cancelled));
        }
        assert_eq!(adapter.invocation_count().await, 1);
        assert!(scheduler.status().cancelled);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let scheduler = scheduler(&config, Arc::new(MockAdapter::new("m", &[]))).await;
        scheduler.run(1).await.unwrap();
        scheduler.shutdown().await;

        let request = ConversionRequest::new(dir.path().join("a.md"), "txt");
        assert!(matches!(
            scheduler.submit(request.clone()),
            Err(SchedulerError::ShutDown)
        ));

        let results = scheduler.convert_all(vec![request]).await;
        assert!(results[0].is_failure());
    }

    #[tokio::test]
    async fn test_shutdown_without_run_resolves_queued_jobs() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let adapter = Arc::new(MockAdapter::new("pandoc", &[("markdown", "txt")]));
        let scheduler = scheduler(&config, adapter.clone()).await;

        let input = write_input(dir.path(), "never.md", b"# Never\n").await;
        let handle = scheduler.submit(ConversionRequest::new(input, "txt")).unwrap();
        scheduler.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap();
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::Cancelled));
        assert_eq!(scheduler.status().queued_jobs, 0);
        assert_eq!(adapter.invocation_count().await, 0);
    }

    #[tokio::test]
    async fn test_jobs_queued_before_run_start_later() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let adapter = Arc::new(MockAdapter::new("pandoc", &[("markdown", "txt")]));
        let scheduler = scheduler(&config, adapter).await;

        let input = write_input(dir.path(), "early.md", b"# Early\n").await;
        let handle = scheduler.submit(ConversionRequest::new(input, "txt")).unwrap();
        assert_eq!(scheduler.status().queued_jobs, 1);

        scheduler.run(1).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap();
        assert!(result.is_success());
        scheduler.shutdown().await;
    }
}
