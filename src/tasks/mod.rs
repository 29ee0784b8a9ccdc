//! Background task execution: a bounded FIFO queue drained by a fixed pool
//! of workers, with best-effort result reporting and counters.

mod manager;
mod queue;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state_machine::ProjectId;

pub use manager::{TaskManager, TaskStats};
pub use queue::{MemoryQueue, TaskQueue};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskManagerError {
    #[error("task queue is full")]
    QueueFull,

    #[error("task manager is not running")]
    NotRunning,

    #[error("task manager is already running")]
    AlreadyRunning,
}

/// A unit of background work.
#[async_trait]
pub trait Task: Send + Sync {
    /// Runs the task. Implementations check `cancel` between steps.
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    fn project_id(&self) -> ProjectId;

    /// Accepted for future use; dequeue order is FIFO.
    fn priority(&self) -> i32 {
        0
    }

    fn name(&self) -> &str;
}

/// A task waiting in the queue.
pub struct QueuedTask {
    pub id: Uuid,
    pub task: Arc<dyn Task>,
    pub enqueued_at: Instant,
}

impl QueuedTask {
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            enqueued_at: Instant::now(),
        }
    }
}

/// Outcome of one execution, pushed to the results channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub project_id: ProjectId,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
