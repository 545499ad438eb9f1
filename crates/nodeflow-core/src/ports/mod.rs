//! Ports - 抽象化レイヤー
//!
//! 外部システム（タスクの永続化、リソースプール、クラスタ操作）への
//! インターフェースを定義します。実装の詳細はこのクレートの外側に置きます。
//!
//! # 設計原則
//! - Task の正本は TaskStore（このクレートは永続化エンジンを持たない）
//! - クラウド API の詳細は ResourcePoolApi / ClusterOps の実装側に閉じ込める
//! - 時刻と ID 生成は差し替え可能（テストでは FixedClock）

pub mod clock;
pub mod cluster_ops;
pub mod id_generator;
pub mod node_group_store;
pub mod quota_source;
pub mod resource_pool;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::cluster_ops::ClusterOps;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::node_group_store::NodeGroupStore;
pub use self::quota_source::QuotaSource;
pub use self::resource_pool::ResourcePoolApi;
pub use self::task_store::{TaskFilter, TaskStore};
