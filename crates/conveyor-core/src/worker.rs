use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::ExecutionError;
use crate::executor::TaskExecutor;
use crate::pool::Shared;
use crate::status::{StatusStore, TaskStatus};
use crate::task::Task;

/// Held by each worker loop; reports the exit to the pool when dropped.
///
/// Dropping also covers a loop future that is dropped without ever being polled.
pub(crate) struct WorkerGuard {
    shared: Arc<Shared>,
}

impl WorkerGuard {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.shared.worker_exited();
    }
}

/// Pull tasks until the queue is closed and empty.
pub(crate) async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Task>>>,
    executor: Arc<dyn TaskExecutor>,
    guard: WorkerGuard,
) {
    debug!(worker_id, "worker started");
    let mut handled = 0usize;

    loop {
        // lock は recv の間だけ。処理中は他の worker が次を取れる
        let next = {
            let mut queue = queue.lock().await;
            queue.recv().await
        };

        let Some(task) = next else {
            // 全 sender が drop され、キューも空
            break;
        };

        process_task(worker_id, task, &executor, &guard.shared.statuses).await;
        handled += 1;
    }

    debug!(worker_id, handled, "worker exiting: queue closed and drained");
    drop(guard);
}

/// Run one task to a terminal status, retrying with backoff.
pub(crate) async fn process_task(
    worker_id: usize,
    task: Task,
    executor: &Arc<dyn TaskExecutor>,
    statuses: &StatusStore,
) -> TaskStatus {
    let task = Arc::new(task);
    let mut backoff = Backoff::new(task.max_retries());

    loop {
        statuses.set(task.id(), TaskStatus::Running).await;
        debug!(
            worker_id,
            task_id = %task.id(),
            attempt = backoff.attempt() + 1,
            "processing task"
        );

        match run_attempt(executor, &task).await {
            Ok(()) => {
                statuses.set(task.id(), TaskStatus::Done).await;
                info!(worker_id, task_id = %task.id(), attempts = backoff.attempt() + 1, "task done");
                return TaskStatus::Done;
            }
            Err(err) => match backoff.next() {
                Some(delay) => {
                    warn!(
                        worker_id,
                        task_id = %task.id(),
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    statuses.set(task.id(), TaskStatus::Failed).await;
                    error!(
                        worker_id,
                        task_id = %task.id(),
                        max_retries = task.max_retries(),
                        error = %err,
                        "task failed after exhausting retries"
                    );
                    return TaskStatus::Failed;
                }
            },
        }
    }
}

/// One executor call on its own tokio task, so a panic only fails this attempt.
async fn run_attempt(executor: &Arc<dyn TaskExecutor>, task: &Arc<Task>) -> Result<(), ExecutionError> {
    let executor = Arc::clone(executor);
    let task = Arc::clone(task);

    match tokio::spawn(async move { executor.execute(&task).await }).await {
        Ok(result) => result,
        Err(join_err) => Err(ExecutionError::new(format!("executor aborted: {join_err}"))),
    }
}
