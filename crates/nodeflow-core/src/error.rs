use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{StepId, TaskId};

/// A zone whose quota would be exceeded by a scale-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneShortage {
    pub zone: String,
    pub oversold_total: u64,
    pub group_quota: u64,
    pub increment: u64,
}

impl fmt::Display for ZoneShortage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "zone={} quota={} + increment={} > total={}",
            self.zone, self.group_quota, self.increment, self.oversold_total
        )
    }
}

fn join_shortages(shortages: &[ZoneShortage]) -> String {
    shortages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed or incomplete operation request. No task is created.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Resource pool / cloud call failed (after the client's retry budget).
    #[error("remote call {operation} failed: {message}")]
    Remote { operation: String, message: String },

    /// Polling exceeded its deadline. The remote operation may still succeed.
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("insufficient quota: {}", join_shortages(.0))]
    InsufficientQuota(Vec<ZoneShortage>),

    #[error("task {0} is force-terminated")]
    Terminated(TaskId),

    #[error("step {step_id} of task {task_id} cannot run: {reason}")]
    OutOfOrder {
        task_id: TaskId,
        step_id: StepId,
        reason: String,
    },

    /// Start-up / wiring defect (unregistered step, duplicate handler, ...).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled while {0}")]
    Cancelled(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Handler(String),
}

impl FlowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// Whether a later resubmission of the same step could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::Remote { .. }
                | FlowError::Timeout { .. }
                | FlowError::Store(_)
                | FlowError::Handler(_)
                | FlowError::InsufficientQuota(_)
        )
    }
}
