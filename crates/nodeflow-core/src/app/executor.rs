//! TaskExecutor - 1 タスクの 1 ステップを完了まで進める
//!
//! # フロー（run_step）
//! 1. Task をロード（無ければ NotFound）
//! 2. force_terminate → Terminated（handler は呼ばない）
//! 3. Step が Success / Skipped 済み、または Task が Success → AlreadyDone
//!    （handler は呼ばない。副作用を二度起こさない）
//! 4. 順序チェック（前のステップが Success / Skipped でなければ OutOfOrder）
//! 5. Running にして保存 → handler 実行（max_execution があれば timeout）
//! 6. 成功: 次へ進める / 最後なら Task Success
//! 7. 失敗: skip_on_failed なら Skipped で次へ、それ以外は Step / Task とも Failure
//!
//! ステップ間のロールバックはしない。再試行は外側からの run_step 再投入。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accessor::{StepContext, TaskAccessor};
use super::registry::ProviderRegistries;
use crate::config::ExecutorConfig;
use crate::domain::{StepId, StepStatus, Task, TaskId, TaskStatus};
use crate::error::FlowError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step was already Success or Skipped, or the task had finished;
    /// nothing ran.
    AlreadyDone,
    /// `next` is `None` when the task just finished.
    Succeeded { next: Option<StepId> },
    /// The step failed but is allowed to; the task moved on.
    SkippedOnFailure { next: Option<StepId> },
}

impl StepOutcome {
    /// The step a scheduler should enqueue next, if any.
    pub fn next_step(&self) -> Option<&StepId> {
        match self {
            StepOutcome::AlreadyDone => None,
            StepOutcome::Succeeded { next } | StepOutcome::SkippedOnFailure { next } => next.as_ref(),
        }
    }
}

pub struct TaskExecutor {
    accessor: Arc<TaskAccessor>,
    registries: Arc<ProviderRegistries>,
    default_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl TaskExecutor {
    pub fn new(
        accessor: Arc<TaskAccessor>,
        registries: Arc<ProviderRegistries>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            accessor,
            registries,
            default_timeout: config.default_step_timeout_secs.map(Duration::from_secs),
            cancel: CancellationToken::new(),
        }
    }

    /// Handlers observe this token through `StepContext::cancellation`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn accessor(&self) -> &Arc<TaskAccessor> {
        &self.accessor
    }

    pub async fn run_step(&self, task_id: &TaskId, step_id: &StepId) -> Result<StepOutcome, FlowError> {
        let mut task = self.accessor.load(task_id).await?;
        if task.force_terminate {
            return Err(FlowError::Terminated(task.id));
        }
        let step = task
            .step(step_id)
            .ok_or_else(|| FlowError::not_found("step", format!("{task_id}/{step_id}")))?;
        let done = matches!(step.status, StepStatus::Success | StepStatus::Skipped);
        if done || task.status == TaskStatus::Success {
            debug!(task_id = %task_id, step = %step_id, status = ?step.status, "step already done, skipping");
            return Ok(StepOutcome::AlreadyDone);
        }
        let limit = step.max_execution().or(self.default_timeout);
        let skip_on_failed = step.skip_on_failed;

        self.accessor.ensure_runnable(&task, step_id)?;
        let handler = self.registries.handler(&task.provider, step_id)?;

        self.accessor.mark_running(&mut task, step_id)?;
        self.accessor.save(&mut task).await?;
        info!(task_id = %task_id, step = %step_id, operation = %task.operation, "step started");

        let mut ctx = StepContext::new(task, step_id.clone(), Arc::clone(&self.accessor), self.cancel.clone());
        let result = match limit {
            Some(limit) => match tokio::time::timeout(limit, handler.execute(&mut ctx)).await {
                Ok(result) => result,
                Err(_) => Err(FlowError::Timeout {
                    what: format!("step {step_id}"),
                    elapsed: limit,
                }),
            },
            None => handler.execute(&mut ctx).await,
        };
        let mut task = ctx.into_task();

        match result {
            Ok(()) => {
                let next = self.accessor.mark_succeeded(&mut task, step_id)?;
                self.accessor.save(&mut task).await?;
                info!(task_id = %task_id, step = %step_id, next = ?next, status = ?task.status, "step succeeded");
                Ok(StepOutcome::Succeeded { next })
            }
            Err(e) if skip_on_failed => {
                let next = self.accessor.mark_skipped(&mut task, step_id, &e)?;
                self.accessor.save(&mut task).await?;
                warn!(task_id = %task_id, step = %step_id, error = %e, "step failed, skipped");
                Ok(StepOutcome::SkippedOnFailure { next })
            }
            Err(e) => {
                self.accessor.mark_failed(&mut task, step_id, &e)?;
                self.accessor.save(&mut task).await?;
                error!(task_id = %task_id, step = %step_id, error = %e, "step failed");
                Err(e)
            }
        }
    }

    /// Sets the force-terminate flag. An unfinished task becomes Failure.
    pub async fn terminate_task(&self, task_id: &TaskId) -> Result<Task, FlowError> {
        let mut task = self.accessor.load(task_id).await?;
        self.accessor.mark_terminated(&mut task);
        self.accessor.save(&mut task).await?;
        info!(task_id = %task_id, status = ?task.status, "task terminated");
        Ok(task)
    }

    /// Reopens a failed task at its failed step. Returns the step to resubmit.
    pub async fn retry_task(&self, task_id: &TaskId) -> Result<StepId, FlowError> {
        let mut task = self.accessor.load(task_id).await?;
        let step_id = self.accessor.reopen(&mut task)?;
        self.accessor.save(&mut task).await?;
        info!(task_id = %task_id, step = %step_id, "task reopened for retry");
        Ok(step_id)
    }

    /// Runs the current step until the task succeeds. A step failure is
    /// returned as the error (the task is already persisted as Failure).
    pub async fn drive(&self, task_id: &TaskId) -> Result<Task, FlowError> {
        loop {
            let task = self.accessor.load(task_id).await?;
            if task.status == TaskStatus::Success {
                return Ok(task);
            }
            let step_id = task
                .current_step
                .clone()
                .ok_or_else(|| FlowError::config(format!("task {task_id} has no current step")))?;

            if let StepOutcome::AlreadyDone = self.run_step(task_id, &step_id).await? {
                return self.accessor.load(task_id).await;
            }
        }
    }
}
