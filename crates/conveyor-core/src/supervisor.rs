//! Ordered process shutdown: stop the transport, stop intake, wait for the
//! drain under a deadline.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::TransportError;

/// Inbound transport that can stop accepting new work.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stop accepting connections and finish the ones in progress.
    async fn stop(&self) -> Result<(), TransportError>;
}

/// What the supervisor needs from the dispatch side.
#[async_trait]
pub trait Drain: Send + Sync {
    async fn shutdown(&self);
    async fn wait_for_completion(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Bound for stopping the transport.
    pub transport_timeout: Duration,

    /// Bound for the whole sequence, transport phase included.
    pub deadline: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            transport_timeout: Duration::from_secs(5),
            deadline: Duration::from_secs(30),
        }
    }
}

/// Why shutdown started.
#[derive(Debug, Clone)]
pub enum ShutdownTrigger {
    Signal(String),
    TransportFailed(TransportError),
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Signal(name) => write!(f, "signal {name}"),
            ShutdownTrigger::TransportFailed(err) => write!(f, "transport failure: {err}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportOutcome {
    Stopped,
    Failed(TransportError),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every admitted task reached a terminal status.
    Completed,

    /// The deadline fired first. Workers are still running in the background.
    TimedOut,

    /// The wait itself panicked or was cancelled; completion is unknown.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    pub transport: TransportOutcome,
    pub drain: DrainOutcome,
    pub elapsed: Duration,
}

/// Runs the shutdown sequence at most once per process.
///
/// 1. `Transport::stop`, bounded by `transport_timeout`. Errors are logged only.
/// 2. `Drain::shutdown`, so no new tasks are admitted.
/// 3. `Drain::wait_for_completion` on a background task, raced against the
///    deadline. Losing the race is reported, not fatal; nothing is killed.
pub struct Supervisor {
    config: ShutdownConfig,
    triggered: AtomicBool,
    finished: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(config: ShutdownConfig) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            config,
            triggered: AtomicBool::new(false),
            finished,
        }
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Has a shutdown sequence been started?
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Returns `None` when a sequence was already started by an earlier trigger.
    pub async fn graceful_shutdown(
        &self,
        trigger: ShutdownTrigger,
        transport: &dyn Transport,
        dispatch: Arc<dyn Drain>,
    ) -> Option<ShutdownReport> {
        if self.triggered.swap(true, Ordering::AcqRel) {
            info!(%trigger, "shutdown already in progress, ignoring trigger");
            return None;
        }

        let started = Instant::now();
        let deadline = started + self.config.deadline;
        info!(%trigger, deadline_ms = self.config.deadline.as_millis() as u64, "graceful shutdown started");

        info!("shutdown 1/3: stopping transport");
        let budget = self
            .config
            .transport_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let transport = match tokio::time::timeout(budget, transport.stop()).await {
            Ok(Ok(())) => TransportOutcome::Stopped,
            Ok(Err(err)) => {
                warn!(error = %err, "transport did not stop cleanly");
                TransportOutcome::Failed(err)
            }
            Err(_) => {
                warn!(timeout_ms = budget.as_millis() as u64, "transport stop timed out");
                TransportOutcome::TimedOut
            }
        };

        info!("shutdown 2/3: no longer accepting tasks");
        dispatch.shutdown().await;

        info!("shutdown 3/3: waiting for in-flight tasks");
        let waiter = tokio::spawn(async move { dispatch.wait_for_completion().await });
        let drain = match tokio::time::timeout_at(deadline, waiter).await {
            Ok(Ok(())) => {
                info!("all tasks finished");
                DrainOutcome::Completed
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "waiting for in-flight tasks failed");
                DrainOutcome::Aborted
            }
            Err(_) => {
                // the waiter keeps running; unfinished tasks are abandoned by this caller
                warn!("shutdown deadline reached before tasks finished");
                DrainOutcome::TimedOut
            }
        };

        let report = ShutdownReport {
            trigger,
            transport,
            drain,
            elapsed: started.elapsed(),
        };
        info!(elapsed_ms = report.elapsed.as_millis() as u64, drain = ?report.drain, "graceful shutdown finished");

        self.finished.send_replace(true);
        Some(report)
    }

    /// Resolve once a shutdown sequence has run to the end.
    pub async fn finished(&self) {
        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(ShutdownConfig::default())
    }
}
