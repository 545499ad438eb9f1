//! nodeflow-core
//!
//! Task orchestration core for cluster and node-group operations backed by
//! a remote resource pool.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task/step, common params, operation, node group, pool order）
//! - **ports**: 抽象化レイヤー（TaskStore, ResourcePoolApi, QuotaSource, ClusterOps, Clock など）
//! - **app**: オーケストレーション（builder, executor, registry, accessor, worker）
//! - **pool**: リソースプールクライアント（apply / poll / destroy）と quota allocator
//! - **steps**: resource-pool provider のステップ実装
//! - **impls**: 開発用の in-memory 実装
//! - **config / error**: 設定と共通エラー型

pub mod domain;
pub mod ports;
pub mod app;
pub mod pool;
pub mod steps;
pub mod impls;

pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod testing;
