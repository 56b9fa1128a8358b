//! Task status tracking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::task::TaskId;

/// Latest known status of a task.
///
/// State transitions:
/// - Queued -> Running -> Done
/// - Queued -> Running -> (Running on retry) -> Failed
///
/// Nothing moves back to Queued, and Done/Failed are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Admitted, waiting for a worker.
    Queued,

    /// Claimed by a worker (including backoff sleeps between attempts).
    Running,

    /// Finished successfully.
    Done,

    /// Retries exhausted.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub status: TaskStatus,
    pub updated_at: DateTime<Utc>,
}

/// Per-status tally, for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.done + self.failed
    }
}

/// Owned map of task id -> latest status, behind a single lock.
///
/// Only the pool holds one of these. Without eviction the map grows for the
/// whole process lifetime; see `evict_terminal_before`.
#[derive(Debug, Default)]
pub struct StatusStore {
    entries: Mutex<HashMap<TaskId, StatusEntry>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional upsert (last writer wins).
    pub async fn set(&self, id: &TaskId, status: TaskStatus) {
        let entry = StatusEntry {
            status,
            updated_at: Utc::now(),
        };
        self.entries.lock().await.insert(id.clone(), entry);
    }

    /// Forget `id`. Returns the entry that was removed, if any.
    pub async fn remove(&self, id: &TaskId) -> Option<StatusEntry> {
        self.entries.lock().await.remove(id)
    }

    pub async fn get(&self, id: &TaskId) -> Option<TaskStatus> {
        self.entries.lock().await.get(id).map(|entry| entry.status)
    }

    pub async fn entry(&self, id: &TaskId) -> Option<StatusEntry> {
        self.entries.lock().await.get(id).copied()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn counts(&self) -> StatusCounts {
        let entries = self.entries.lock().await;
        let mut counts = StatusCounts::default();
        for entry in entries.values() {
            match entry.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Drop terminal entries last updated before `cutoff`. Returns how many were removed.
    ///
    /// Queued/Running entries are never evicted.
    pub async fn evict_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !(entry.status.is_terminal() && entry.updated_at < cutoff));
        before - entries.len()
    }
}
