//! Bounded worker pool for conversion jobs.
//!
//! A fixed number of workers pull jobs from a FIFO queue, so at most
//! `max_concurrency` conversions run at once. Every submission returns a
//! [`JobHandle`] that resolves to the job's result.

mod job;
mod pool;

pub use job::JobHandle;
pub use pool::{Scheduler, SchedulerStatus};

use thiserror::Error;

use crate::error::ConversionError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Scheduler has shut down")]
    ShutDown,

    #[error("Worker exited before reporting a result")]
    WorkerLost,
}

impl From<SchedulerError> for ConversionError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ShutDown => ConversionError::Cancelled,
            other => ConversionError::Io(std::io::Error::other(other.to_string())),
        }
    }
}
