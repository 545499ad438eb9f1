//! ClusterOps port - クラスタ側の操作
//!
//! cordon / script / workflow / join / remove など、クラウド API や
//! Kubernetes API を叩く部分。リソースプール以外のステップはここ経由で副作用を起こす。

use async_trait::async_trait;

use crate::error::FlowError;

#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn create_control_plane(&self, cluster_id: &str, masters: &[String]) -> Result<(), FlowError>;

    async fn delete_control_plane(&self, cluster_id: &str) -> Result<(), FlowError>;

    /// `cordon = false` uncordons.
    async fn set_schedulable(
        &self,
        cluster_id: &str,
        node_ips: &[String],
        cordon: bool,
    ) -> Result<(), FlowError>;

    async fn run_script(&self, cluster_id: &str, node_ips: &[String], script: &str) -> Result<(), FlowError>;

    async fn run_workflow(
        &self,
        cluster_id: &str,
        workflow_id: &str,
        node_ips: &[String],
    ) -> Result<(), FlowError>;

    /// Join nodes. With `cordoned`, they join unschedulable.
    async fn attach_nodes(
        &self,
        cluster_id: &str,
        node_group_id: Option<&str>,
        node_ips: &[String],
        cordoned: bool,
    ) -> Result<(), FlowError>;

    async fn remove_nodes(&self, cluster_id: &str, node_ips: &[String]) -> Result<(), FlowError>;

    /// Ok once every node reports Ready.
    async fn verify_nodes(&self, cluster_id: &str, node_ips: &[String]) -> Result<(), FlowError>;

    async fn delete_node_group(&self, cluster_id: &str, node_group_id: &str) -> Result<(), FlowError>;
}
