//! Worker pool: bounded queue, fixed worker set, status map and lifecycle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{AdmissionError, PoolConfigError};
use crate::executor::TaskExecutor;
use crate::status::{StatusCounts, StatusStore, TaskStatus};
use crate::task::{Task, TaskId};
use crate::worker::{self, WorkerGuard};

/// Lifecycle of a pool.
///
/// NotStarted -> Running -> ShuttingDown -> Stopped, or NotStarted -> Stopped
/// when a pool is shut down before it ever started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PoolState {
    NotStarted = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolState::NotStarted,
            1 => PoolState::Running,
            2 => PoolState::ShuttingDown,
            _ => PoolState::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker loops.
    pub workers: usize,

    /// Queue capacity.
    pub queue_size: usize,

    /// How long `add_task` may wait for a free slot. `None` waits as long as it takes.
    pub enqueue_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 64,
            enqueue_timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn new(workers: usize, queue_size: usize) -> Self {
        Self {
            workers,
            queue_size,
            enqueue_timeout: None,
        }
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), PoolConfigError> {
        if self.workers == 0 {
            return Err(PoolConfigError::NoWorkers);
        }
        if self.queue_size == 0 {
            return Err(PoolConfigError::EmptyQueue);
        }
        Ok(())
    }
}

/// Pool port.
///
/// The dispatch service only talks to this trait, so the pool implementation
/// can be swapped without touching the transport side.
#[async_trait]
pub trait TaskPool: Send + Sync {
    /// Launch the workers. Calling it again has no effect.
    fn start(&self);

    /// Admit a task, waiting for a queue slot if the queue is full.
    async fn add_task(&self, task: Task) -> Result<(), AdmissionError>;

    async fn status(&self, id: &TaskId) -> Option<TaskStatus>;

    async fn counts(&self) -> StatusCounts;

    /// Forget terminal statuses not updated for `older_than`.
    async fn evict_finished(&self, older_than: Duration) -> usize;

    /// Stop admitting tasks and let workers drain the queue. Idempotent.
    async fn shutdown(&self);

    /// Resolve once every worker loop has exited.
    async fn wait_for_completion(&self);

    fn is_running(&self) -> bool;
}

/// State shared between the pool handle and its workers.
pub(crate) struct Shared {
    state: AtomicU8,
    pub(crate) statuses: StatusStore,
    live_workers: watch::Sender<usize>,
}

impl Shared {
    fn new(workers: usize) -> Self {
        let (live_workers, _) = watch::channel(workers);
        Self {
            state: AtomicU8::new(PoolState::NotStarted as u8),
            statuses: StatusStore::new(),
            live_workers,
        }
    }

    fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: PoolState, to: PoolState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called once per worker when its loop ends.
    pub(crate) fn worker_exited(&self) {
        self.live_workers.send_modify(|live| {
            *live = live.saturating_sub(1);
            // Stopped must be visible before waiters are notified
            if *live == 0 && self.transition(PoolState::ShuttingDown, PoolState::Stopped) {
                info!("worker pool stopped: all workers exited");
            }
        });
    }
}

/// Fixed-size pool of workers pulling from one bounded queue.
///
/// - `start()` spawns the workers on the current tokio runtime.
/// - `add_task()` applies backpressure when the queue is full.
/// - `shutdown()` closes intake; workers finish everything already admitted.
/// - `wait_for_completion()` waits for the workers to exit.
pub struct WorkerPool {
    config: PoolConfig,
    shared: Arc<Shared>,
    executor: Arc<dyn TaskExecutor>,
    /// `None` once intake is closed. Dropping the last sender closes the queue.
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, executor: Arc<dyn TaskExecutor>) -> Result<Self, PoolConfigError> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_size);
        Ok(Self {
            shared: Arc::new(Shared::new(config.workers)),
            config,
            executor,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.shared.transition(PoolState::NotStarted, PoolState::Running) {
            debug!(state = ?self.state(), "worker pool start ignored");
            return;
        }

        for worker_id in 0..self.config.workers {
            let guard = WorkerGuard::new(Arc::clone(&self.shared));
            tokio::spawn(worker::worker_loop(
                worker_id,
                Arc::clone(&self.receiver),
                Arc::clone(&self.executor),
                guard,
            ));
        }

        info!(
            workers = self.config.workers,
            queue_size = self.config.queue_size,
            "worker pool started"
        );
    }

    pub async fn add_task(&self, task: Task) -> Result<(), AdmissionError> {
        match self.state() {
            PoolState::Running => {}
            PoolState::NotStarted => {
                warn!(task_id = %task.id(), "task rejected: worker pool is not running");
                return Err(AdmissionError::NotRunning(task.id().clone()));
            }
            PoolState::ShuttingDown | PoolState::Stopped => {
                warn!(task_id = %task.id(), "task rejected: worker pool is shutting down");
                return Err(AdmissionError::ShuttingDown(task.id().clone()));
            }
        }

        let Some(sender) = self.current_sender() else {
            warn!(task_id = %task.id(), "task rejected: worker pool is shutting down");
            return Err(AdmissionError::ShuttingDown(task.id().clone()));
        };

        // 満杯ならここで待つ (backpressure)
        let reserved = match self.config.enqueue_timeout {
            Some(limit) => match tokio::time::timeout(limit, sender.reserve()).await {
                Ok(reserved) => reserved,
                Err(_) => {
                    warn!(
                        task_id = %task.id(),
                        timeout_ms = limit.as_millis() as u64,
                        "task rejected: queue stayed full"
                    );
                    return Err(AdmissionError::QueueFull(task.id().clone()));
                }
            },
            None => sender.reserve().await,
        };
        let Ok(permit) = reserved else {
            warn!(task_id = %task.id(), "task rejected: queue closed");
            return Err(AdmissionError::ShuttingDown(task.id().clone()));
        };

        // shutdown may have happened while this caller was waiting for a slot
        if !self.is_running() {
            drop(permit);
            warn!(task_id = %task.id(), "task rejected: worker pool shut down while waiting for a slot");
            return Err(AdmissionError::ShuttingDown(task.id().clone()));
        }

        // Queued has to land before any worker can see the task
        let id = task.id().clone();
        self.shared.statuses.set(&id, TaskStatus::Queued).await;

        // close_intake takes the same lock, so the send is either before it or rejected
        let sent = {
            let slot = self.sender_slot();
            if slot.is_some() && self.is_running() {
                permit.send(task);
                true
            } else {
                drop(permit);
                false
            }
        };
        if !sent {
            self.shared.statuses.remove(&id).await;
            warn!(task_id = %id, "task rejected: worker pool shut down while enqueuing");
            return Err(AdmissionError::ShuttingDown(id));
        }

        debug!(task_id = %id, "task queued");
        Ok(())
    }

    /// Unconditional status upsert.
    pub async fn set_status(&self, id: &TaskId, status: TaskStatus) {
        self.shared.statuses.set(id, status).await;
    }

    pub async fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.shared.statuses.get(id).await
    }

    pub async fn counts(&self) -> StatusCounts {
        self.shared.statuses.counts().await
    }

    pub async fn evict_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };
        self.shared.statuses.evict_terminal_before(cutoff).await
    }

    /// Close intake. Returns `true` for the one call that actually did it.
    ///
    /// Does not wait for the drain; see `wait_for_completion`.
    pub fn shutdown(&self) -> bool {
        if self.shared.transition(PoolState::NotStarted, PoolState::Stopped) {
            self.close_intake();
            self.shared.live_workers.send_replace(0);
            info!("worker pool shut down before it was started");
            return true;
        }

        if !self.shared.transition(PoolState::Running, PoolState::ShuttingDown) {
            debug!(state = ?self.state(), "worker pool shutdown already requested");
            return false;
        }

        info!("worker pool shutting down: no new tasks, draining queue");
        self.close_intake();
        true
    }

    pub async fn wait_for_completion(&self) {
        let mut live = self.shared.live_workers.subscribe();
        // the sender lives in `shared`, so this cannot observe a closed channel
        let _ = live.wait_for(|n| *n == 0).await;
    }

    fn current_sender(&self) -> Option<mpsc::Sender<Task>> {
        self.sender_slot().clone()
    }

    fn close_intake(&self) {
        // workers keep receiving until every in-flight add_task drops its clone
        drop(self.sender_slot().take());
    }

    fn sender_slot(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<Task>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskPool for WorkerPool {
    fn start(&self) {
        WorkerPool::start(self)
    }

    async fn add_task(&self, task: Task) -> Result<(), AdmissionError> {
        WorkerPool::add_task(self, task).await
    }

    async fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        WorkerPool::status(self, id).await
    }

    async fn counts(&self) -> StatusCounts {
        WorkerPool::counts(self).await
    }

    async fn evict_finished(&self, older_than: Duration) -> usize {
        WorkerPool::evict_finished(self, older_than).await
    }

    async fn shutdown(&self) {
        WorkerPool::shutdown(self);
    }

    async fn wait_for_completion(&self) {
        WorkerPool::wait_for_completion(self).await
    }

    fn is_running(&self) -> bool {
        WorkerPool::is_running(self)
    }
}
