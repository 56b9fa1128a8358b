use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::task::TaskId;

/// Why a task was not admitted to the queue.
///
/// A rejected task never reaches a worker and never gets a status entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("task {0} rejected: worker pool is not running")]
    NotRunning(TaskId),

    #[error("task {0} rejected: worker pool is shutting down")]
    ShuttingDown(TaskId),

    #[error("task {0} rejected: queue is full")]
    QueueFull(TaskId),
}

impl AdmissionError {
    pub fn task_id(&self) -> &TaskId {
        match self {
            AdmissionError::NotRunning(id)
            | AdmissionError::ShuttingDown(id)
            | AdmissionError::QueueFull(id) => id,
        }
    }
}

/// A single attempt of a task failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExecutionError(String);

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolConfigError {
    #[error("the number of workers must be greater than 0")]
    NoWorkers,

    #[error("the queue size must be greater than 0")]
    EmptyQueue,
}

/// Why the inbound transport stopped or failed to stop cleanly.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("server error: {0}")]
    Serve(#[source] Arc<io::Error>),

    #[error("server exited without being asked to stop")]
    Exited,

    #[error("server task ended without reporting")]
    TaskLost,
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Serve(Arc::new(err))
    }
}
