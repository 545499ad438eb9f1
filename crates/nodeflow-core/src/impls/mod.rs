//! Impls - 開発用・テスト用の ports 実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: Task の正本（プロセス内）
//! - **InMemoryNodeGroupStore**: 読み取り専用の NodeGroup 置き場
//! - **StaticQuotaSource**: 固定のキャパシティスナップショット
//!
//! 本番用の実装（DB、リソースプールの HTTP クライアントなど）は別クレートに置く。

pub mod inmem_task_store;
pub mod static_sources;

pub use self::inmem_task_store::InMemoryTaskStore;
pub use self::static_sources::{InMemoryNodeGroupStore, StaticQuotaSource};
