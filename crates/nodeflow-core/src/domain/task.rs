//! Task record: ordered steps + shared parameters.
//!
//! Design:
//! - This is the persisted "single source of truth" for an operation.
//! - Record-level transitions live here; sequencing rules are enforced by
//!   `app::accessor::TaskAccessor`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{StepId, TaskId};
use super::operation::OperationType;
use super::params::CommonParams;

/// Task state.
///
/// - Init -> Running -> Success
/// - Init -> Running -> Failure (-> Running again when a failed step is resubmitted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Init,
    Running,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Init | TaskStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    NotStarted,
    Running,
    Success,
    Failure,
    Skipped,
}

impl StepStatus {
    /// The next step may start once this one is done.
    pub fn is_done(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub label: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Owning subsystem (e.g. `resource-pool`, `cluster`).
    pub subsystem: String,

    /// Handler invocations beyond the first.
    #[serde(default)]
    pub retry_count: u32,

    /// A failure marks the step Skipped and the task moves on.
    #[serde(default)]
    pub skip_on_failed: bool,

    /// Upper bound on one handler invocation.
    #[serde(default)]
    pub max_execution_secs: Option<u64>,
}

impl Step {
    pub fn new(id: StepId, label: impl Into<String>, subsystem: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            params: HashMap::new(),
            status: StepStatus::NotStarted,
            started_at: None,
            finished_at: None,
            last_error: None,
            subsystem: subsystem.into(),
            retry_count: 0,
            skip_on_failed: false,
            max_execution_secs: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn skip_on_failed(mut self) -> Self {
        self.skip_on_failed = true;
        self
    }

    pub fn with_max_execution(mut self, limit: Duration) -> Self {
        self.max_execution_secs = Some(limit.as_secs());
        self
    }

    pub fn max_execution(&self) -> Option<Duration> {
        self.max_execution_secs.map(Duration::from_secs)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.status != StepStatus::NotStarted {
            self.retry_count += 1;
        }
        self.status = StepStatus::Running;
        self.started_at = Some(now);
        self.finished_at = None;
        self.last_error = None;
    }

    pub fn succeed(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Success;
        self.finished_at = Some(now);
    }

    pub fn fail(&mut self, now: DateTime<Utc>, error: String) {
        self.status = StepStatus::Failure;
        self.finished_at = Some(now);
        self.last_error = Some(error);
    }

    pub fn skip(&mut self, now: DateTime<Utc>, error: String) {
        self.status = StepStatus::Skipped;
        self.finished_at = Some(now);
        self.last_error = Some(error);
    }

    /// Back to NotStarted for a resubmission. `retry_count` is kept.
    pub fn reset(&mut self) {
        self.status = StepStatus::NotStarted;
        self.finished_at = None;
    }
}

/// What the task operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTarget {
    pub cluster_id: String,
    pub node_group_id: Option<String>,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub operation: OperationType,
    /// Selects the step table the steps resolve against.
    pub provider: String,
    pub target: TaskTarget,
    pub step_sequence: Vec<StepId>,
    pub steps: HashMap<StepId, Step>,
    pub current_step: Option<StepId>,
    pub status: TaskStatus,
    pub common: CommonParams,
    pub force_terminate: bool,
    pub message: Option<String>,
    pub creator: String,
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: TaskId,
        operation: OperationType,
        provider: impl Into<String>,
        target: TaskTarget,
        creator: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let creator = creator.into();
        Self {
            id,
            operation,
            provider: provider.into(),
            target,
            step_sequence: Vec::new(),
            steps: HashMap::new(),
            current_step: None,
            status: TaskStatus::Init,
            common: CommonParams::new(),
            force_terminate: false,
            message: None,
            operator: creator.clone(),
            creator,
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a step to the sequence. The first step becomes current.
    /// Returns false (and changes nothing) if the ID is already present.
    pub fn push_step(&mut self, step: Step) -> bool {
        if self.steps.contains_key(&step.id) {
            return false;
        }
        if self.current_step.is_none() {
            self.current_step = Some(step.id.clone());
        }
        self.step_sequence.push(step.id.clone());
        self.steps.insert(step.id.clone(), step);
        true
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.get(id)
    }

    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.get_mut(id)
    }

    pub fn position(&self, id: &StepId) -> Option<usize> {
        self.step_sequence.iter().position(|s| s == id)
    }

    pub fn next_step_after(&self, id: &StepId) -> Option<&StepId> {
        let pos = self.position(id)?;
        self.step_sequence.get(pos + 1)
    }

    /// Steps before `id` that are not yet done.
    pub fn pending_predecessors(&self, id: &StepId) -> Vec<&StepId> {
        let Some(pos) = self.position(id) else {
            return Vec::new();
        };
        self.step_sequence[..pos]
            .iter()
            .filter(|s| {
                self.steps
                    .get(*s)
                    .map(|step| !step.status.is_done())
                    .unwrap_or(true)
            })
            .collect()
    }

    pub fn node_group_id(&self) -> Option<&str> {
        self.target.node_group_id.as_deref()
    }
}
