//! Mock tool adapter for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterError, ExitStatus, Invocation, ToolAdapter};
use crate::format::{FormatId, FormatPair};

/// What a successful mock invocation leaves at the output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutput {
    /// Signature bytes for the target format followed by the input bytes.
    Valid,
    /// A zero-length file.
    Empty,
    /// Nothing at all.
    Missing,
}

/// Signature a well-formed artifact of `format` starts with.
pub fn payload_header(format: &FormatId) -> &'static [u8] {
    match format.as_str() {
        "pdf" => b"%PDF-1.7\n",
        "docx" | "xlsx" | "pptx" | "epub" | "odt" | "ods" | "odp" | "zip" => b"PK\x03\x04",
        "png" => b"\x89PNG\r\n\x1a\n",
        "jpg" => &[0xFF, 0xD8, 0xFF, 0xE0],
        "gif" => b"GIF89a",
        "tiff" => b"II*\x00",
        "djvu" => b"AT&TFORM",
        "rtf" => b"{\\rtf1",
        "ps" => b"%!PS\n",
        _ => b"",
    }
}

/// Mock implementation of the ToolAdapter trait.
///
/// Provides controllable behavior for testing:
/// - Record every invocation for assertions
/// - Fail transiently a given number of times, or always
/// - Simulate slow tools (honouring cancellation)
/// - Track the peak number of concurrent invocations
///
/// # Example
///
/// ```rust,ignore
/// use metamorph_core::testing::MockAdapter;
///
/// let adapter = MockAdapter::new("pdftotext", &[("pdf", "txt")]).with_score(90);
/// adapter.set_transient_failures(2).await;
///
/// // ... run a conversion ...
///
/// assert_eq!(adapter.invocation_count().await, 3);
/// ```
#[derive(Debug)]
pub struct MockAdapter {
    name: String,
    pairs: Vec<FormatPair>,
    score: i32,
    critical: bool,
    available: bool,
    /// Recorded invocations.
    invocations: Arc<RwLock<Vec<Invocation>>>,
    /// Number of upcoming invocations that exit nonzero.
    transient_failures: Arc<RwLock<u32>>,
    /// Every invocation exits nonzero.
    always_fail: Arc<RwLock<bool>>,
    /// Simulated tool runtime.
    delay: Arc<RwLock<Duration>>,
    output: Arc<RwLock<MockOutput>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockAdapter {
    /// Create a mock adapter converting the given pairs, with score 50.
    pub fn new(name: &str, pairs: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            pairs: pairs.iter().map(|(a, b)| FormatPair::new(*a, *b)).collect(),
            score: 50,
            critical: false,
            available: true,
            invocations: Arc::new(RwLock::new(Vec::new())),
            transient_failures: Arc::new(RwLock::new(0)),
            always_fail: Arc::new(RwLock::new(false)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            output: Arc::new(RwLock::new(MockOutput::Valid)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_score(mut self, score: i32) -> Self {
        self.score = score;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Makes `probe()` report the tool as missing.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Get all recorded invocations.
    pub async fn recorded_invocations(&self) -> Vec<Invocation> {
        self.invocations.read().await.clone()
    }

    /// Get the number of invocations performed.
    pub async fn invocation_count(&self) -> usize {
        self.invocations.read().await.len()
    }

    /// Clear recorded invocations.
    pub async fn clear_recorded(&self) {
        self.invocations.write().await.clear();
    }

    /// The next `count` invocations exit with status 1.
    pub async fn set_transient_failures(&self, count: u32) {
        *self.transient_failures.write().await = count;
    }

    /// Every invocation exits with status 1.
    pub async fn set_always_fail(&self, fail: bool) {
        *self.always_fail.write().await = fail;
    }

    /// Set the simulated runtime of each invocation.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub async fn set_output(&self, output: MockOutput) {
        *self.output.write().await = output;
    }

    /// Highest number of invocations observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of invocations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn write_output(&self, invocation: &Invocation) -> Result<(), AdapterError> {
        match *self.output.read().await {
            MockOutput::Valid => {
                let mut bytes = payload_header(&invocation.to).to_vec();
                bytes.extend_from_slice(&tokio::fs::read(&invocation.input).await?);
                if bytes.is_empty() {
                    bytes.extend_from_slice(invocation.to.as_str().as_bytes());
                }
                tokio::fs::write(&invocation.output, bytes).await?;
            }
            MockOutput::Empty => tokio::fs::write(&invocation.output, b"").await?,
            MockOutput::Missing => {}
        }
        Ok(())
    }
}

/// Decrements the in-flight counter when an invocation ends or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ToolAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_pairs(&self) -> &[FormatPair] {
        &self.pairs
    }

    fn capability_score(&self) -> i32 {
        self.score
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    async fn probe(&self) -> bool {
        self.available
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, AdapterError> {
        self.invocations.write().await.push(invocation.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(self.in_flight.clone());

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            // Slow tools stream their output as they go.
            tokio::fs::write(&invocation.output, b"partial").await?;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
            }
        }

        {
            let mut failures = self.transient_failures.write().await;
            if *failures > 0 {
                *failures -= 1;
                return Ok(ExitStatus::failure(1, "simulated transient failure"));
            }
        }
        if *self.always_fail.read().await {
            return Ok(ExitStatus::failure(1, "simulated failure"));
        }

        self.write_output(invocation).await?;
        Ok(ExitStatus::success())
    }
}
