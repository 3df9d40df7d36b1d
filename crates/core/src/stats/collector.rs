use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::record::StatsRecord;
use crate::config::StatsConfig;
use crate::processor::ConversionResult;

const COMMAND_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Stats I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stats collector has stopped")]
    Stopped,
}

enum StatsCommand {
    Record(Box<ConversionResult>),
    Snapshot(oneshot::Sender<StatsRecord>),
    Flush(oneshot::Sender<Result<(), StatsError>>),
    Shutdown(oneshot::Sender<Result<StatsRecord, StatsError>>),
}

/// Handle to the task that owns the statistics aggregate.
///
/// Clones share the same task. Commands are processed in the order they are
/// sent, so a snapshot taken after `record` returns includes that result.
#[derive(Debug, Clone)]
pub struct StatsCollector {
    tx: mpsc::Sender<StatsCommand>,
}

impl std::fmt::Debug for StatsCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Record(_) => "Record",
            Self::Snapshot(_) => "Snapshot",
            Self::Flush(_) => "Flush",
            Self::Shutdown(_) => "Shutdown",
        };
        f.write_str(name)
    }
}

impl StatsCollector {
    /// Starts the collector task from `seed`. With a `persist_path`, `flush`
    /// and `shutdown` write the aggregate there.
    pub fn spawn(seed: StatsRecord, persist_path: Option<PathBuf>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run(rx, seed, persist_path));
        Self { tx }
    }

    /// Starts a collector seeded from the configured stats file.
    pub async fn from_config(config: &StatsConfig) -> Self {
        if !config.persist {
            return Self::spawn(StatsRecord::default(), None);
        }
        let seed = match StatsRecord::load(&config.path).await {
            Ok(seed) => seed,
            Err(e) => {
                warn!("Failed to read stats file {}: {}", config.path.display(), e);
                StatsRecord::default()
            }
        };
        Self::spawn(seed, Some(config.path.clone()))
    }

    /// Records one result. Dropped silently if the collector has stopped.
    pub async fn record(&self, result: &ConversionResult) {
        if self
            .tx
            .send(StatsCommand::Record(Box::new(result.clone())))
            .await
            .is_err()
        {
            debug!("Stats collector stopped; dropping result {}", result.job_id);
        }
    }

    pub async fn snapshot(&self) -> Result<StatsRecord, StatsError> {
        let (reply, rx) = oneshot::channel();
        self.send(StatsCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| StatsError::Stopped)
    }

    /// Persists the current aggregate (no-op without a stats file).
    pub async fn flush(&self) -> Result<(), StatsError> {
        let (reply, rx) = oneshot::channel();
        self.send(StatsCommand::Flush(reply)).await?;
        rx.await.map_err(|_| StatsError::Stopped)?
    }

    /// Flushes and stops the collector, returning the final aggregate.
    pub async fn shutdown(&self) -> Result<StatsRecord, StatsError> {
        let (reply, rx) = oneshot::channel();
        self.send(StatsCommand::Shutdown(reply)).await?;
        rx.await.map_err(|_| StatsError::Stopped)?
    }

    async fn send(&self, command: StatsCommand) -> Result<(), StatsError> {
        self.tx.send(command).await.map_err(|_| StatsError::Stopped)
    }
}

async fn run(
    mut rx: mpsc::Receiver<StatsCommand>,
    mut stats: StatsRecord,
    persist_path: Option<PathBuf>,
) {
    let flush = |stats: StatsRecord| {
        let path = persist_path.clone();
        async move {
            match path {
                Some(path) => stats.save(&path).await.map_err(StatsError::from),
                None => Ok(()),
            }
        }
    };

    while let Some(command) = rx.recv().await {
        match command {
            StatsCommand::Record(result) => stats.record(&result),
            StatsCommand::Snapshot(reply) => {
                let _ = reply.send(stats.clone());
            }
            StatsCommand::Flush(reply) => {
                let _ = reply.send(flush(stats.clone()).await);
            }
            StatsCommand::Shutdown(reply) => {
                let result = flush(stats.clone()).await.map(|()| stats.clone());
                let _ = reply.send(result);
                return;
            }
        }
    }

    // Every handle dropped without an explicit shutdown.
    if let Err(e) = flush(stats).await {
        warn!("Failed to persist stats: {}", e);
    }
}
