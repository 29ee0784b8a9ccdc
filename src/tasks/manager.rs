use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{MemoryQueue, QueuedTask, Task, TaskManagerError, TaskQueue, TaskResult};

/// Counters exposed to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total_submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: usize,
    pub is_running: bool,
}

/// Running flag, counters and worker handles behind one lock.
#[derive(Default)]
struct Shared {
    running: bool,
    submitted: u64,
    completed: u64,
    failed: u64,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed pool of workers draining a [`TaskQueue`].
///
/// Each worker runs one task to completion before taking the next. Task
/// outcomes go to a bounded results channel drained by a collector; when
/// that channel is full the outcome is dropped with a warning. Counters are
/// updated regardless.
pub struct TaskManager {
    workers: usize,
    results_capacity: usize,
    queue: Arc<dyn TaskQueue>,
    shared: Arc<Mutex<Shared>>,
    /// The collector waits for a permit before draining, if set.
    collector_gate: Option<Arc<Semaphore>>,
}

impl TaskManager {
    pub fn new(workers: usize, queue_capacity: usize, results_capacity: usize) -> Self {
        Self::with_queue(
            workers,
            Arc::new(MemoryQueue::new(queue_capacity)),
            results_capacity,
        )
    }

    pub fn with_queue(workers: usize, queue: Arc<dyn TaskQueue>, results_capacity: usize) -> Self {
        Self {
            workers: workers.max(1),
            results_capacity: results_capacity.max(1),
            queue,
            shared: Arc::new(Mutex::new(Shared::default())),
            collector_gate: None,
        }
    }

    #[cfg(test)]
    fn with_stalled_collector(mut self, gate: Arc<Semaphore>) -> Self {
        self.collector_gate = Some(gate);
        self
    }

    /// Spawns the workers and the result collector.
    pub fn start(&self) -> Result<(), TaskManagerError> {
        let mut shared = lock(&self.shared);
        if shared.running {
            return Err(TaskManagerError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let (results_tx, results_rx) = mpsc::channel(self.results_capacity);
        let mut handles = Vec::with_capacity(self.workers + 1);
        for worker in 0..self.workers {
            handles.push(tokio::spawn(worker_loop(
                worker,
                self.queue.clone(),
                self.shared.clone(),
                results_tx.clone(),
                cancel.clone(),
            )));
        }
        drop(results_tx);
        handles.push(tokio::spawn(collect_results(
            results_rx,
            self.collector_gate.clone(),
            cancel.clone(),
        )));

        shared.running = true;
        shared.cancel = cancel;
        shared.handles = handles;
        info!(workers = self.workers, "task manager started");
        Ok(())
    }

    /// Signals workers to stop and waits up to `deadline` for in-flight
    /// tasks. Tasks still running at the deadline are detached, not aborted.
    pub async fn stop(&self, deadline: Duration) {
        let (cancel, handles) = {
            let mut shared = lock(&self.shared);
            if !shared.running {
                debug!("task manager already stopped");
                return;
            }
            shared.running = false;
            (shared.cancel.clone(), std::mem::take(&mut shared.handles))
        };

        cancel.cancel();
        let drained = tokio::time::timeout(deadline, async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "worker ended abnormally");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("task manager stopped gracefully"),
            Err(_) => warn!(
                deadline_ms = deadline.as_millis() as u64,
                "shutdown deadline reached, detaching running tasks"
            ),
        }
    }

    /// Enqueues a task. Fails fast when not running or when the queue is
    /// full; the caller owns compensating any state it changed.
    pub fn submit(&self, task: Arc<dyn Task>) -> Result<Uuid, TaskManagerError> {
        let mut shared = lock(&self.shared);
        if !shared.running {
            return Err(TaskManagerError::NotRunning);
        }

        let queued = QueuedTask::new(task);
        let task_id = queued.id;
        let project_id = queued.task.project_id();
        let priority = queued.task.priority();
        let name = queued.task.name().to_string();

        if let Err(e) = self.queue.try_push(queued) {
            warn!(task_id = %task_id, project_id, task = %name, error = %e, "task rejected");
            return Err(e);
        }
        shared.submitted += 1;
        info!(task_id = %task_id, project_id, priority, task = %name, "task submitted");
        Ok(task_id)
    }

    pub fn stats(&self) -> TaskStats {
        let shared = lock(&self.shared);
        TaskStats {
            total_submitted: shared.submitted,
            completed: shared.completed,
            failed: shared.failed,
            pending: self.queue.len(),
            is_running: shared.running,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared).running
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<dyn TaskQueue>,
    shared: Arc<Mutex<Shared>>,
    results: mpsc::Sender<TaskResult>,
    cancel: CancellationToken,
) {
    debug!(worker, "worker started");
    while let Some(queued) = queue.pop(&cancel).await {
        let result = run_task(worker, queued, cancel.clone()).await;
        {
            let mut shared = lock(&shared);
            if result.success {
                shared.completed += 1;
            } else {
                shared.failed += 1;
            }
        }
        if let Err(mpsc::error::TrySendError::Full(dropped)) = results.try_send(result) {
            warn!(
                task_id = %dropped.task_id,
                project_id = dropped.project_id,
                "results channel full, dropping task result"
            );
        }
    }
    debug!(worker, "worker stopped");
}

/// Executes one task in its own spawned future so a panic becomes a
/// failed result instead of taking the worker down.
async fn run_task(worker: usize, queued: QueuedTask, cancel: CancellationToken) -> TaskResult {
    let QueuedTask {
        id,
        task,
        enqueued_at,
    } = queued;
    let project_id = task.project_id();
    info!(
        worker,
        task_id = %id,
        project_id,
        task = task.name(),
        queued_ms = enqueued_at.elapsed().as_millis() as u64,
        "task started"
    );

    let started = Instant::now();
    let outcome = tokio::spawn({
        let task = task.clone();
        async move { task.execute(cancel).await }
    })
    .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(e) if e.is_panic() => Some("task panicked".to_string()),
        Err(e) => Some(format!("task aborted: {e}")),
    };
    match &error {
        None => info!(worker, task_id = %id, project_id, duration_ms, "task completed"),
        Some(err) => error!(worker, task_id = %id, project_id, duration_ms, error = %err, "task failed"),
    }

    TaskResult {
        task_id: id,
        project_id,
        success: error.is_none(),
        error,
        duration_ms,
    }
}

async fn collect_results(
    mut results: mpsc::Receiver<TaskResult>,
    gate: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
) {
    if let Some(gate) = gate {
        tokio::select! {
            _ = gate.acquire() => {}
            _ = cancel.cancelled() => {}
        }
    }
    while let Some(result) = results.recv().await {
        debug!(
            task_id = %result.task_id,
            project_id = result.project_id,
            success = result.success,
            duration_ms = result.duration_ms,
            "task result collected"
        );
    }
}
