//! Task record: the immutable unit of work handed to the pool.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-supplied task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One unit of work.
///
/// Fields are read-only once built; the pool owns the task from enqueue until
/// its terminal status is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    payload: String,
    max_retries: u32,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, payload: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            max_retries,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// How many retries are allowed after the first failed attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
