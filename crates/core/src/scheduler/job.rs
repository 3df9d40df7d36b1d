use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::SchedulerError;
use crate::error::ConversionError;
use crate::processor::{ConversionRequest, ConversionResult};

/// A queued job, owned by the scheduler until a worker reports on it.
#[derive(Debug)]
pub(crate) struct JobRecord {
    pub job_id: String,
    pub request: ConversionRequest,
    pub reply: oneshot::Sender<ConversionResult>,
    pub queued_at: Instant,
}

/// Resolves to the result of a submitted job.
///
/// If the worker disappears without answering, the handle resolves to a
/// failed result rather than hanging.
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    request: ConversionRequest,
    rx: oneshot::Receiver<ConversionResult>,
}

impl JobHandle {
    pub(crate) fn new(
        job_id: String,
        request: ConversionRequest,
        rx: oneshot::Receiver<ConversionResult>,
    ) -> Self {
        Self {
            job_id,
            request,
            rx,
        }
    }

    /// A handle that is already resolved, for jobs that never entered the queue.
    pub(crate) fn rejected(job_id: String, request: ConversionRequest, error: SchedulerError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(ConversionResult::failed(
            job_id.clone(),
            &request,
            &ConversionError::from(error),
        ));
        Self::new(job_id, request, rx)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Future for JobHandle {
    type Output = ConversionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(ConversionResult::failed(
                self.job_id.clone(),
                &self.request,
                &ConversionError::from(SchedulerError::WorkerLost),
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::processor::ConversionStatus;

    #[tokio::test]
    async fn test_handle_resolves_with_reply() {
        let (tx, rx) = oneshot::channel();
        let request = ConversionRequest::new("/in/a.md", "txt");
        let handle = JobHandle::new("job-1".to_string(), request.clone(), rx);

        let mut result = ConversionResult::new("job-1", &request);
        result.status = ConversionStatus::Success;
        tx.send(result).unwrap();

        assert!(handle.await.is_success());
    }

    #[tokio::test]
    async fn test_dropped_reply_fails() {
        let (tx, rx) = oneshot::channel::<ConversionResult>();
        let handle = JobHandle::new("job-2".to_string(), ConversionRequest::new("/in/a.md", "txt"), rx);
        drop(tx);

        let result = handle.await;
        assert!(result.is_failure());
        assert_eq!(result.error_kind, Some(ErrorKind::Io));
    }

    #[tokio::test]
    async fn test_rejected_handle() {
        let handle = JobHandle::rejected(
            "job-3".to_string(),
            ConversionRequest::new("/in/a.md", "txt"),
            SchedulerError::ShutDown,
        );
        assert_eq!(handle.job_id(), "job-3");
        assert_eq!(handle.await.error_kind, Some(ErrorKind::Cancelled));
    }
}
