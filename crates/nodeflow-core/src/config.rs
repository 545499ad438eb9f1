//! Engine configuration.
//!
//! Loading (files, env, flags) belongs to the binary; this module only defines
//! the shape and the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::pool::retry::{PollPolicy, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolClientConfig,
    pub executor: ExecutorConfig,
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, FlowError> {
        serde_json::from_str(s).map_err(|e| FlowError::config(format!("engine config: {e}")))
    }
}

/// Resource pool client timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolClientConfig {
    /// Submission attempts for apply/return orders (including the first).
    pub submit_attempts: u32,
    pub submit_retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_deadline_ms: u64,
}

impl Default for PoolClientConfig {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            submit_retry_delay_ms: 3_000,
            poll_interval_ms: 30_000,
            poll_deadline_ms: 30 * 60_000,
        }
    }
}

impl PoolClientConfig {
    pub fn submit_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.submit_attempts,
            Duration::from_millis(self.submit_retry_delay_ms),
        )
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            deadline: Duration::from_millis(self.poll_deadline_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// In-process workers consuming the step queue.
    pub workers: usize,
    /// Applied to steps that carry no limit of their own. `None` = unbounded.
    pub default_step_timeout_secs: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            default_step_timeout_secs: None,
        }
    }
}
