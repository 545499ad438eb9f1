//! App - アプリケーション層
//!
//! ports を組み合わせてタスクのオーケストレーションを実装します。
//!
//! # 主要コンポーネント
//! - **TaskBuilder**: operation request → ステップ列を持つ Task
//! - **TaskExecutor**: 1 ステップを実行し、状態機械を進める
//! - **StepRegistry**: provider ごとの step ID → handler
//! - **TaskAccessor**: 永続化された Task への状態遷移
//! - **WorkerGroup**: StepQueue を消費する in-process スケジューラ

pub mod accessor;
pub mod builder;
pub mod executor;
pub mod registry;
pub mod worker;

pub use self::accessor::{StepContext, TaskAccessor};
pub use self::builder::{ResourcePoolTaskBuilder, TaskBuilder};
pub use self::executor::{StepOutcome, TaskExecutor};
pub use self::registry::{ProviderRegistries, StepHandler, StepRegistry};
pub use self::worker::{StepDelivery, StepQueue, WorkerGroup, resume_in_flight, submit};
