//! TaskStore port - Task の正本（source of truth）
//!
//! 永続化エンジンはこのクレートの外側。必要なのは
//! get-by-ID / 丸ごと update / 条件付き一覧 の3つだけ。

use async_trait::async_trait;

use crate::domain::{OperationType, Task, TaskId, TaskStatus};
use crate::error::FlowError;

/// Listing filter. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub cluster_id: Option<String>,
    pub node_group_id: Option<String>,
    pub operation: Option<OperationType>,
    pub statuses: Option<Vec<TaskStatus>>,
}

impl TaskFilter {
    /// Init/Running tasks of one operation type on one node group.
    pub fn in_flight(node_group_id: impl Into<String>, operation: OperationType) -> Self {
        Self {
            cluster_id: None,
            node_group_id: Some(node_group_id.into()),
            operation: Some(operation),
            statuses: Some(vec![TaskStatus::Init, TaskStatus::Running]),
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(cluster_id) = &self.cluster_id
            && &task.target.cluster_id != cluster_id
        {
            return false;
        }
        if let Some(node_group_id) = &self.node_group_id
            && task.node_group_id() != Some(node_group_id.as_str())
        {
            return false;
        }
        if let Some(operation) = self.operation
            && task.operation != operation
        {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&task.status)
        {
            return false;
        }
        true
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &Task) -> Result<(), FlowError>;

    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>, FlowError>;

    /// Whole-record replace. `NotFound` if the task was never created.
    async fn update(&self, task: &Task) -> Result<(), FlowError>;

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, FlowError>;

    async fn count_in_flight(
        &self,
        node_group_id: &str,
        operation: OperationType,
    ) -> Result<usize, FlowError> {
        let tasks = self
            .list(&TaskFilter::in_flight(node_group_id, operation))
            .await?;
        Ok(tasks.len())
    }
}
