//! TaskAccessor - 永続化された Task への安全な状態遷移
//!
//! # 設計原則
//! - 遷移ルール（順序、強制終了、再実行）はここに集約する
//! - 変更のたびに `save()` で TaskStore に丸ごと書き戻す
//! - 同一 task ID への同時実行は外側のスケジューラが防ぐ（ここではロックしない）
//!
//! # StepContext
//! handler に渡す作業用コピー。handler が書いた common params は
//! 成功・失敗にかかわらず executor が永続化する。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::{CommonKey, CommonParams, Step, StepId, StepStatus, Task, TaskId, TaskStatus};
use crate::error::FlowError;
use crate::ports::{Clock, TaskStore};

pub struct TaskAccessor {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl TaskAccessor {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub async fn load(&self, task_id: &TaskId) -> Result<Task, FlowError> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| FlowError::not_found("task", task_id))
    }

    pub async fn create(&self, task: &Task) -> Result<(), FlowError> {
        self.store.create(task).await
    }

    pub async fn save(&self, task: &mut Task) -> Result<(), FlowError> {
        task.updated_at = self.clock.now();
        self.store.update(task).await
    }

    /// Rejects an unknown step or one whose predecessor is not done yet.
    /// Forced termination is checked by the executor before anything else.
    pub fn ensure_runnable(&self, task: &Task, step_id: &StepId) -> Result<(), FlowError> {
        if task.step(step_id).is_none() {
            return Err(FlowError::not_found("step", format!("{}/{step_id}", task.id)));
        }
        let pending = task.pending_predecessors(step_id);
        if let Some(first) = pending.first() {
            return Err(FlowError::OutOfOrder {
                task_id: task.id,
                step_id: step_id.clone(),
                reason: format!("predecessor '{first}' is not done"),
            });
        }
        Ok(())
    }

    pub fn mark_running(&self, task: &mut Task, step_id: &StepId) -> Result<(), FlowError> {
        let now = self.clock.now();
        step_of(task, step_id)?.start(now);
        task.status = TaskStatus::Running;
        task.current_step = Some(step_id.clone());
        task.message = None;
        Ok(())
    }

    /// Step Success. Advances `current_step`, or finishes the task on the last
    /// step (leaving `current_step` on it). Returns the next step.
    pub fn mark_succeeded(&self, task: &mut Task, step_id: &StepId) -> Result<Option<StepId>, FlowError> {
        let now = self.clock.now();
        step_of(task, step_id)?.succeed(now);
        Ok(self.advance(task, step_id))
    }

    /// Step Skipped after a failure it is allowed to ignore. Same advance rule
    /// as success.
    pub fn mark_skipped(
        &self,
        task: &mut Task,
        step_id: &StepId,
        error: &FlowError,
    ) -> Result<Option<StepId>, FlowError> {
        let now = self.clock.now();
        step_of(task, step_id)?.skip(now, error.to_string());
        Ok(self.advance(task, step_id))
    }

    pub fn mark_failed(&self, task: &mut Task, step_id: &StepId, error: &FlowError) -> Result<(), FlowError> {
        let now = self.clock.now();
        step_of(task, step_id)?.fail(now, error.to_string());
        task.status = TaskStatus::Failure;
        task.current_step = Some(step_id.clone());
        task.message = Some(format!("step {step_id} failed: {error}"));
        Ok(())
    }

    pub fn mark_terminated(&self, task: &mut Task) {
        task.force_terminate = true;
        if !task.status.is_terminal() {
            task.status = TaskStatus::Failure;
            task.message = Some("terminated".to_string());
        }
    }

    /// Reopens a failed task at its failed current step.
    pub fn reopen(&self, task: &mut Task) -> Result<StepId, FlowError> {
        if task.force_terminate {
            return Err(FlowError::Terminated(task.id));
        }
        if task.status != TaskStatus::Failure {
            return Err(FlowError::validation(format!(
                "task {} is {:?}, only failed tasks can be retried",
                task.id, task.status
            )));
        }
        let step_id = task
            .current_step
            .clone()
            .ok_or_else(|| FlowError::config(format!("task {} has no current step", task.id)))?;
        let step = step_of(task, &step_id)?;
        if step.status != StepStatus::Failure {
            return Err(FlowError::validation(format!(
                "step {step_id} is {:?}, not Failure",
                step.status
            )));
        }
        step.reset();
        task.status = TaskStatus::Running;
        task.message = None;
        Ok(step_id)
    }

    fn advance(&self, task: &mut Task, step_id: &StepId) -> Option<StepId> {
        match task.next_step_after(step_id).cloned() {
            Some(next) => {
                task.current_step = Some(next.clone());
                Some(next)
            }
            None => {
                task.status = TaskStatus::Success;
                task.current_step = Some(step_id.clone());
                None
            }
        }
    }
}

fn step_of<'a>(task: &'a mut Task, step_id: &StepId) -> Result<&'a mut Step, FlowError> {
    let task_id = task.id;
    task.step_mut(step_id)
        .ok_or_else(|| FlowError::not_found("step", format!("{task_id}/{step_id}")))
}

/// Working copy of a task handed to a step handler.
pub struct StepContext {
    task: Task,
    step_id: StepId,
    accessor: Arc<TaskAccessor>,
    cancel: CancellationToken,
}

impl StepContext {
    pub(crate) fn new(
        task: Task,
        step_id: StepId,
        accessor: Arc<TaskAccessor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task,
            step_id,
            accessor,
            cancel,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn step(&self) -> Result<&Step, FlowError> {
        self.task
            .step(&self.step_id)
            .ok_or_else(|| FlowError::not_found("step", format!("{}/{}", self.task.id, self.step_id)))
    }

    pub fn step_param(&self, key: &str) -> Option<&str> {
        self.task
            .step(&self.step_id)
            .and_then(|s| s.param(key))
            .filter(|v| !v.is_empty())
    }

    pub fn common(&self) -> &CommonParams {
        &self.task.common
    }

    /// A common parameter the step cannot run without.
    pub fn require(&self, key: CommonKey) -> Result<&str, FlowError> {
        self.task.common.get(key).ok_or_else(|| {
            FlowError::handler(format!(
                "step {} needs common parameter '{key}'",
                self.step_id
            ))
        })
    }

    pub fn set_common(&mut self, key: CommonKey, value: impl Into<String>) {
        self.task.common.set(key, value);
    }

    pub fn set_common_list<S: AsRef<str>>(&mut self, key: CommonKey, values: &[S]) {
        self.task.common.set_list(key, values);
    }

    pub fn remove_common(&mut self, key: CommonKey) -> Option<String> {
        self.task.common.remove(key)
    }

    /// Persist progress so far (e.g. an order ID before polling it).
    pub async fn save(&mut self) -> Result<(), FlowError> {
        self.accessor.save(&mut self.task).await
    }

    /// Fires when the engine is shutting down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn into_task(self) -> Task {
        self.task
    }
}
