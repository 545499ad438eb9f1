//! Resource pool workflow: order client, quota admission, retry policies.

pub mod client;
pub mod quota;
pub mod retry;

pub use client::ResourcePoolClient;
pub use quota::{QuotaAllocator, QuotaDecision};
pub use retry::{PollPolicy, RetryPolicy};
