use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::ExecutionError;
use crate::task::Task;

/// The unit of work the pool runs for a task.
///
/// Called once per attempt. An `Err` (or a panic) counts as a failed attempt and
/// goes through the task's backoff.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), ExecutionError>;
}

/// Placeholder executor: sleeps a random amount and fails at random.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Probability in `[0.0, 1.0]` that an attempt fails.
    pub failure_rate: f64,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(100),
            max_latency: Duration::from_millis(500),
            failure_rate: 0.2,
        }
    }
}

impl SimulatedExecutor {
    pub fn new(min_latency: Duration, max_latency: Duration, failure_rate: f64) -> Self {
        Self {
            min_latency,
            max_latency,
            failure_rate,
        }
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, task: &Task) -> Result<(), ExecutionError> {
        // ThreadRng is !Send, so it must not live across the await below
        let (latency, fails) = {
            let mut rng = rand::thread_rng();
            let latency = if self.max_latency > self.min_latency {
                rng.gen_range(self.min_latency..self.max_latency)
            } else {
                self.min_latency
            };
            (latency, rng.gen_bool(self.failure_rate.clamp(0.0, 1.0)))
        };

        tokio::time::sleep(latency).await;

        if fails {
            return Err(ExecutionError::new(format!(
                "simulated failure for task {}",
                task.id()
            )));
        }
        Ok(())
    }
}
