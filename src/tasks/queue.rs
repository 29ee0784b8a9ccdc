use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::{QueuedTask, TaskManagerError};

/// Admission-controlled FIFO queue. A durable backend can replace the
/// in-memory one without touching the workers.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues without waiting; fails with `QueueFull` at capacity.
    fn try_push(&self, task: QueuedTask) -> Result<(), TaskManagerError>;

    /// Next task in FIFO order, or `None` once `cancel` fires.
    async fn pop(&self, cancel: &CancellationToken) -> Option<QueuedTask>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-memory queue on a tokio mpsc channel. Contents are lost on
/// restart.
pub struct MemoryQueue {
    tx: mpsc::Sender<QueuedTask>,
    rx: Mutex<mpsc::Receiver<QueuedTask>>,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    fn try_push(&self, task: QueuedTask) -> Result<(), TaskManagerError> {
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TaskManagerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TaskManagerError::NotRunning,
        })
    }

    async fn pop(&self, cancel: &CancellationToken) -> Option<QueuedTask> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            task = async {
                let mut rx = self.rx.lock().await;
                rx.recv().await
            } => task,
        }
    }

    fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
