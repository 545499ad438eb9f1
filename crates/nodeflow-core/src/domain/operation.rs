//! Operator intents: the input of a task builder.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::node_group::PoolLinkage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CreateCluster,
    DeleteCluster,
    AddNodesToCluster,
    ScaleUpNodeGroup,
    ScaleDownNodeGroup,
    DeleteNodeGroup,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::CreateCluster => "create_cluster",
            OperationType::DeleteCluster => "delete_cluster",
            OperationType::AddNodesToCluster => "add_nodes_to_cluster",
            OperationType::ScaleUpNodeGroup => "scale_up_node_group",
            OperationType::ScaleDownNodeGroup => "scale_down_node_group",
            OperationType::DeleteNodeGroup => "delete_node_group",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the operator asked for, with the payload each operation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    CreateCluster {
        /// Independent (self-hosted control plane) vs managed control plane.
        independent: bool,
        #[serde(default)]
        masters: Vec<String>,
        #[serde(default)]
        nodes: Vec<String>,
    },
    DeleteCluster {
        /// Pool devices still held by the cluster, returned after teardown.
        #[serde(default)]
        device_ids: Vec<String>,
        /// Where `device_ids` go back to. Required when there are any.
        #[serde(default)]
        pool: Option<PoolLinkage>,
    },
    AddNodesToCluster {
        node_ips: Vec<String>,
    },
    ScaleUpNodeGroup {
        node_group_id: String,
        count: i64,
    },
    ScaleDownNodeGroup {
        node_group_id: String,
        node_ips: Vec<String>,
        device_ids: Vec<String>,
    },
    DeleteNodeGroup {
        node_group_id: String,
        #[serde(default)]
        node_ips: Vec<String>,
        #[serde(default)]
        device_ids: Vec<String>,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationType {
        match self {
            Operation::CreateCluster { .. } => OperationType::CreateCluster,
            Operation::DeleteCluster { .. } => OperationType::DeleteCluster,
            Operation::AddNodesToCluster { .. } => OperationType::AddNodesToCluster,
            Operation::ScaleUpNodeGroup { .. } => OperationType::ScaleUpNodeGroup,
            Operation::ScaleDownNodeGroup { .. } => OperationType::ScaleDownNodeGroup,
            Operation::DeleteNodeGroup { .. } => OperationType::DeleteNodeGroup,
        }
    }

    pub fn node_group_id(&self) -> Option<&str> {
        match self {
            Operation::ScaleUpNodeGroup { node_group_id, .. }
            | Operation::ScaleDownNodeGroup { node_group_id, .. }
            | Operation::DeleteNodeGroup { node_group_id, .. } => Some(node_group_id),
            _ => None,
        }
    }
}

/// Options that toggle optional steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationOptions {
    /// Operator-initiated (true) vs autoscaler-initiated (false).
    pub manual: bool,
    pub pre_script: Option<String>,
    pub post_script: Option<String>,
    /// Platform-defined workflow run on the affected nodes.
    pub workflow_id: Option<String>,
    /// Cluster shares nodes with other workloads; new nodes join cordoned.
    pub mixed_deployment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub cluster_id: String,
    #[serde(default)]
    pub project_id: String,
    pub cloud_id: String,
    pub operator: String,
    pub operation: Operation,
    #[serde(default)]
    pub options: OperationOptions,
}
