//! conveyor-core
//!
//! In-process task dispatch: a bounded queue drained by a fixed set of
//! workers, with per-task retry, status tracking and ordered shutdown.
//!
//! # モジュール構成
//! - **task / status**: タスクと状態 (queued → running → done | failed)
//! - **backoff**: 指数バックオフ + jitter
//! - **executor**: 1 attempt 分の処理 (`TaskExecutor`)
//! - **pool**: `WorkerPool` (bounded queue + workers)
//! - **service**: transport 向けの入口 `DispatchService`
//! - **supervisor**: shutdown の順序制御
//! - **gc**: 終了済み status の掃除

pub mod backoff;
pub mod error;
pub mod executor;
pub mod gc;
pub mod pool;
pub mod service;
pub mod status;
pub mod supervisor;
pub mod task;

mod worker;

pub use backoff::Backoff;
pub use error::{AdmissionError, ExecutionError, PoolConfigError, TransportError};
pub use executor::{SimulatedExecutor, TaskExecutor};
pub use gc::StatusGc;
pub use pool::{PoolConfig, PoolState, TaskPool, WorkerPool};
pub use service::DispatchService;
pub use status::{StatusCounts, StatusEntry, StatusStore, TaskStatus};
pub use supervisor::{
    Drain, DrainOutcome, ShutdownConfig, ShutdownReport, ShutdownTrigger, Supervisor, Transport,
    TransportOutcome,
};
pub use task::{Task, TaskId};
