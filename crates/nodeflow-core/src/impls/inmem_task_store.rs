//! InMemoryTaskStore - 開発用の TaskStore
//!
//! # 実装詳細
//! - HashMap<TaskId, Task> を tokio Mutex で保護
//! - ロックを跨いで await しない（clone して返す）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Task, TaskId};
use crate::error::FlowError;
use crate::ports::{TaskFilter, TaskStore};

#[derive(Default, Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<(), FlowError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(FlowError::Store(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>, FlowError> {
        Ok(self.tasks.lock().await.get(task_id).cloned())
    }

    async fn update(&self, task: &Task) -> Result<(), FlowError> {
        let mut tasks = self.tasks.lock().await;
        let Some(slot) = tasks.get_mut(&task.id) else {
            return Err(FlowError::not_found("task", task.id));
        };
        *slot = task.clone();
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, FlowError> {
        let tasks = self.tasks.lock().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.id);
        Ok(matched)
    }
}
