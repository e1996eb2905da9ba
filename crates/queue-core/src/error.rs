//! Error taxonomy for the queue core.

use thiserror::Error;

/// Returned synchronously from [`crate::queue::Queue::enqueue`] when the
/// adapter refuses to persist a new job.
#[derive(Debug, Error)]
#[error("enqueue failed: {source}")]
pub struct EnqueueError {
    #[from]
    pub source: StorageError,
}

/// Any failure surfaced by a worker invocation, including the synthetic
/// timeout the executor raises when a worker outruns `job.timeout`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker timed out after {0}ms")]
    Timeout(u64),
    #[error("{0}")]
    Failed(String),
}

impl WorkerError {
    /// The string persisted into `metaData.lastError`.
    pub fn message(&self) -> String {
        match self {
            WorkerError::Timeout(ms) => format!("worker timed out after {ms}ms"),
            WorkerError::Failed(msg) => msg.clone(),
        }
    }
}

/// A transient failure from an adapter method. The core treats every
/// occurrence as retryable at the call site: enqueue rejects, the processor
/// logs and waits for the next tick.
#[derive(Debug, Error, Clone)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

impl StorageError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A claimed job named a worker that was never registered. This is recorded
/// on the job (`failed` stamped, `metaData.lastError = "no worker"`) without
/// consuming a retry attempt.
#[derive(Debug, Error)]
#[error("no worker registered for job name {0:?}")]
pub struct MissingWorkerError(pub String);

pub(crate) const MISSING_WORKER_MESSAGE: &str = "no worker";
