use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{AdmissionError, PoolConfigError};
use crate::executor::TaskExecutor;
use crate::pool::{PoolConfig, TaskPool, WorkerPool};
use crate::status::{StatusCounts, TaskStatus};
use crate::supervisor::Drain;
use crate::task::{Task, TaskId};

/// Entry point for the transport layer.
///
/// Turns `submit(id, payload, max_retries)` into a pool task and forwards the
/// lifecycle calls. Holds the pool through `TaskPool` only.
#[derive(Clone)]
pub struct DispatchService {
    pool: Arc<dyn TaskPool>,
}

impl DispatchService {
    /// Wrap a pool and start it. Must be called from within a tokio runtime.
    pub fn new(pool: Arc<dyn TaskPool>) -> Self {
        pool.start();
        Self { pool }
    }

    /// Build and start a `WorkerPool`.
    pub fn with_worker_pool(
        config: PoolConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, PoolConfigError> {
        let pool = WorkerPool::new(config, executor)?;
        Ok(Self::new(Arc::new(pool)))
    }

    pub async fn submit(
        &self,
        id: impl Into<TaskId>,
        payload: impl Into<String>,
        max_retries: u32,
    ) -> Result<(), AdmissionError> {
        let task = Task::new(id, payload, max_retries);
        self.pool.add_task(task).await
    }

    pub async fn shutdown(&self) {
        info!("dispatch service: stopping intake");
        self.pool.shutdown().await;
    }

    pub async fn wait_for_completion(&self) {
        info!("dispatch service: waiting for in-flight tasks");
        self.pool.wait_for_completion().await;
        info!("dispatch service: all tasks finished");
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    pub async fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.pool.status(id).await
    }

    pub async fn counts(&self) -> StatusCounts {
        self.pool.counts().await
    }

    pub async fn evict_finished(&self, older_than: Duration) -> usize {
        self.pool.evict_finished(older_than).await
    }
}

#[async_trait]
impl Drain for DispatchService {
    async fn shutdown(&self) {
        DispatchService::shutdown(self).await
    }

    async fn wait_for_completion(&self) {
        DispatchService::wait_for_completion(self).await
    }
}
