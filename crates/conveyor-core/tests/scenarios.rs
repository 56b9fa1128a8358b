//! End-to-end runs of the pool through `DispatchService` and `Supervisor`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use conveyor_core::{
    AdmissionError, DispatchService, DrainOutcome, ExecutionError, PoolConfig, ShutdownConfig,
    ShutdownTrigger, Supervisor, Task, TaskExecutor, TaskId, TaskStatus, Transport,
    TransportError,
};

/// Always fails and remembers when it was called.
#[derive(Default)]
struct AlwaysFails {
    calls: Mutex<Vec<Instant>>,
}

#[async_trait]
impl TaskExecutor for AlwaysFails {
    async fn execute(&self, _task: &Task) -> Result<(), ExecutionError> {
        self.calls.lock().unwrap().push(Instant::now());
        Err(ExecutionError::new("downstream unavailable"))
    }
}

/// Succeeds after a fixed amount of work.
struct Sleeps(Duration);

#[async_trait]
impl TaskExecutor for Sleeps {
    async fn execute(&self, _task: &Task) -> Result<(), ExecutionError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn stop(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn failing_task_retries_with_growing_delays() {
    let executor = Arc::new(AlwaysFails::default());
    let service = DispatchService::with_worker_pool(PoolConfig::new(1, 1), executor.clone()).unwrap();

    service.submit("t1", "payload", 3).await.unwrap();
    service.shutdown().await;
    service.wait_for_completion().await;

    assert_eq!(service.status(&TaskId::new("t1")).await, Some(TaskStatus::Failed));

    let calls = executor.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 4, "one attempt plus three retries");

    let slack = Duration::from_millis(2);
    for (i, nominal_ms) in [100u64, 200, 400].into_iter().enumerate() {
        let gap = calls[i + 1] - calls[i];
        let nominal = Duration::from_millis(nominal_ms);
        assert!(gap >= nominal.mul_f64(0.8), "gap {i} too short: {gap:?}");
        assert!(gap <= nominal.mul_f64(1.2) + slack, "gap {i} too long: {gap:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn every_task_finishes_before_wait_returns() {
    let service = DispatchService::with_worker_pool(
        PoolConfig::new(4, 64),
        Arc::new(Sleeps(Duration::from_millis(250))),
    )
    .unwrap();

    for i in 0..10 {
        service.submit(format!("task-{i}"), "payload", 1).await.unwrap();
    }
    service.shutdown().await;
    service.wait_for_completion().await;

    for i in 0..10 {
        let id = TaskId::new(format!("task-{i}"));
        assert_eq!(service.status(&id).await, Some(TaskStatus::Done), "{id}");
    }
    let counts = service.counts().await;
    assert_eq!(counts.done, 10);
    assert_eq!(counts.total(), 10);
}

#[tokio::test(start_paused = true)]
async fn deadline_abandons_slow_tasks_without_killing_them() {
    let service = Arc::new(
        DispatchService::with_worker_pool(
            PoolConfig::new(1, 4),
            Arc::new(Sleeps(Duration::from_secs(10))),
        )
        .unwrap(),
    );
    service.submit("slow", "payload", 1).await.unwrap();
    // let the worker pick it up
    tokio::time::sleep(Duration::from_millis(1)).await;

    let supervisor = Supervisor::new(ShutdownConfig {
        transport_timeout: Duration::from_secs(5),
        deadline: Duration::from_secs(1),
    });
    let report = supervisor
        .graceful_shutdown(
            ShutdownTrigger::Signal("SIGTERM".into()),
            &NoopTransport,
            service.clone(),
        )
        .await
        .unwrap();

    assert_eq!(report.drain, DrainOutcome::TimedOut);
    assert!(report.elapsed < Duration::from_millis(1100));
    assert_eq!(service.status(&TaskId::new("slow")).await, Some(TaskStatus::Running));

    // the worker was left running and still finishes
    service.wait_for_completion().await;
    assert_eq!(service.status(&TaskId::new("slow")).await, Some(TaskStatus::Done));
}

#[tokio::test(start_paused = true)]
async fn rejected_task_leaves_no_status() {
    let service =
        DispatchService::with_worker_pool(PoolConfig::new(1, 1), Arc::new(Sleeps(Duration::ZERO))).unwrap();
    service.shutdown().await;

    let err = service.submit("late", "payload", 1).await.unwrap_err();

    assert!(matches!(err, AdmissionError::ShuttingDown(_) | AdmissionError::NotRunning(_)));
    assert_eq!(service.status(&TaskId::new("late")).await, None);
    assert_eq!(service.counts().await.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn terminal_status_does_not_change_afterwards() {
    let service = DispatchService::with_worker_pool(
        PoolConfig::new(2, 8),
        Arc::new(Sleeps(Duration::from_millis(50))),
    )
    .unwrap();

    service.submit("a", "payload", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.status(&TaskId::new("a")).await, Some(TaskStatus::Done));

    service.submit("b", "payload", 1).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    service.shutdown().await;
    service.wait_for_completion().await;

    assert_eq!(service.status(&TaskId::new("a")).await, Some(TaskStatus::Done));
    assert_eq!(service.status(&TaskId::new("b")).await, Some(TaskStatus::Done));
}
