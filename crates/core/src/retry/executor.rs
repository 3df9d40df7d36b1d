use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::ConversionError;
use crate::metrics;

/// Result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ConversionError>,
    pub attempts: u32,
}

/// Re-runs an operation while it fails with a transient error.
///
/// Attempts are bounded by `max_attempts` (total, not extra). Permanent errors
/// and cancellation end the loop immediately; the sleep between attempts is
/// cut short by cancellation as well.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Runs `operation` (given the 1-based attempt number) until it succeeds,
    /// fails permanently, or runs out of attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ConversionError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome {
                    result: Err(ConversionError::Cancelled),
                    attempts: attempt - 1,
                };
            }

            let error = match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                debug!("Attempt {} failed permanently: {}", attempt, error);
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }
            if attempt >= max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, error);
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            let delay = self.config.delay_after(attempt);
            warn!(
                "Attempt {}/{} failed ({}), retrying in {:?}",
                attempt, max_attempts, error, delay
            );
            metrics::RETRY_ATTEMPTS
                .with_label_values(&[error.kind().as_str()])
                .inc();

            tokio::select! {
                _ = cancel.cancelled() => {
                    return RetryOutcome {
                        result: Err(ConversionError::Cancelled),
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
