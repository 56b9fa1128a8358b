//! Periodic eviction of terminal status entries.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::service::DispatchService;

const MAX_INTERVAL: Duration = Duration::from_secs(60);
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Drops `done`/`failed` entries older than `ttl`. Active entries are never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusGc {
    interval: Duration,
    ttl: Duration,
}

impl StatusGc {
    /// Sweep every `min(ttl, 60s)`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            interval: ttl.clamp(MIN_INTERVAL, MAX_INTERVAL),
            ttl,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// One sweep. Returns the number of evicted entries.
    pub async fn sweep(&self, service: &DispatchService) -> usize {
        let evicted = service.evict_finished(self.ttl).await;
        if evicted > 0 {
            info!(evicted, ttl_ms = self.ttl.as_millis() as u64, "evicted finished task statuses");
        }
        evicted
    }

    /// Sweep until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, service: DispatchService, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        debug!(interval_ms = self.interval.as_millis() as u64, "status gc started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(&service).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("status gc stopped");
    }
}
