//! WorkerGroup - in-process scheduler
//!
//! # フロー
//! 1. StepQueue から `StepDelivery { task_id, step_id }` を受け取る
//! 2. TaskExecutor::run_step() を実行
//! 3. 成功（または skip）したら次の current step を enqueue
//!
//! キューは at-least-once。同じ delivery が二度来ても、Success 済みの
//! ステップは executor 側で no-op になる。
//! shutdown は CancellationToken。実行中の step は中断しない。

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::builder::TaskBuilder;
use super::executor::{StepOutcome, TaskExecutor};
use crate::domain::{OperationRequest, StepId, TaskId, TaskStatus};
use crate::error::FlowError;
use crate::ports::{TaskFilter, TaskStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDelivery {
    pub task_id: TaskId,
    pub step_id: StepId,
}

/// Unbounded at-least-once step queue shared by all workers.
#[derive(Clone)]
pub struct StepQueue {
    tx: mpsc::UnboundedSender<StepDelivery>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<StepDelivery>>>,
}

impl StepQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn enqueue(&self, delivery: StepDelivery) -> Result<(), FlowError> {
        self.tx
            .send(delivery)
            .map_err(|e| FlowError::Store(format!("step queue closed, dropped {:?}", e.0)))
    }

    /// Waits for the next delivery. `None` once every sender is gone.
    pub async fn next(&self) -> Option<StepDelivery> {
        self.rx.lock().await.recv().await
    }
}

impl Default for StepQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a task, persists it and enqueues its first step.
pub async fn submit(
    builder: &dyn TaskBuilder,
    store: &dyn TaskStore,
    queue: &StepQueue,
    request: &OperationRequest,
) -> Result<TaskId, FlowError> {
    let task = builder.build(request).await?;
    store.create(&task).await?;
    let step_id = task
        .current_step
        .clone()
        .ok_or_else(|| FlowError::config(format!("task {} has no current step", task.id)))?;
    queue.enqueue(StepDelivery {
        task_id: task.id,
        step_id,
    })?;
    info!(task_id = %task.id, operation = %task.operation, "task submitted");
    Ok(task.id)
}

/// Re-enqueues the current step of every Init/Running task, e.g. after a
/// restart. Returns how many deliveries were queued.
pub async fn resume_in_flight(store: &dyn TaskStore, queue: &StepQueue) -> Result<usize, FlowError> {
    let filter = TaskFilter {
        statuses: Some(vec![TaskStatus::Init, TaskStatus::Running]),
        ..Default::default()
    };
    let mut queued = 0;
    for task in store.list(&filter).await? {
        if task.force_terminate {
            continue;
        }
        let Some(step_id) = task.current_step.clone() else {
            warn!(task_id = %task.id, "in-flight task has no current step");
            continue;
        };
        queue.enqueue(StepDelivery {
            task_id: task.id,
            step_id,
        })?;
        queued += 1;
    }
    info!(queued, "in-flight tasks resumed");
    Ok(queued)
}

/// Worker group handle.
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, queue: StepQueue, executor: Arc<TaskExecutor>, cancel: CancellationToken) -> Self {
        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = queue.clone();
            let ex = Arc::clone(&executor);
            let token = cancel.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, q, ex, token).await;
            }));
        }
        Self { cancel, joins }
    }

    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                error!(error = %e, "worker panicked");
            }
        }
    }
}

async fn worker_loop(worker_id: usize, queue: StepQueue, executor: Arc<TaskExecutor>, cancel: CancellationToken) {
    debug!(worker_id, "worker started");
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = queue.next() => delivery,
        };
        let Some(delivery) = delivery else {
            break;
        };

        match executor.run_step(&delivery.task_id, &delivery.step_id).await {
            Ok(outcome) => {
                if let Some(next) = outcome.next_step() {
                    let next = StepDelivery {
                        task_id: delivery.task_id,
                        step_id: next.clone(),
                    };
                    if let Err(e) = queue.enqueue(next) {
                        error!(worker_id, task_id = %delivery.task_id, error = %e, "enqueue next step failed");
                    }
                } else if outcome == StepOutcome::AlreadyDone {
                    debug!(worker_id, task_id = %delivery.task_id, step = %delivery.step_id, "duplicate delivery");
                }
            }
            Err(e) => {
                warn!(
                    worker_id,
                    task_id = %delivery.task_id,
                    step = %delivery.step_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "step did not complete"
                );
            }
        }
    }
    debug!(worker_id, "worker stopped");
}
