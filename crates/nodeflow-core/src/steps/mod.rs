//! Steps - resource-pool provider のステップ実装
//!
//! step ID と step param のキーはここで定数として持つ。
//! builder はこの ID で Task を組み立て、executor は同じ ID で handler を引く。
//!
//! # 登録
//! `register_resource_pool_steps()` が唯一の登録リスト。起動時に 1 回だけ呼ぶ。

pub mod cluster;
pub mod instances;

use std::sync::Arc;

use crate::app::registry::StepRegistry;
use crate::error::FlowError;
use crate::pool::{QuotaAllocator, ResourcePoolClient};
use crate::ports::{ClusterOps, NodeGroupStore};

pub use self::cluster::{ClusterAction, ClusterStep};
pub use self::instances::{ApplyInstancesStep, DestroyInstancesStep};

/// Provider name of the self-hosted device pool.
pub const RESOURCE_POOL_PROVIDER: &str = "resource-pool";

pub const APPLY_INSTANCES: &str = "apply-instances";
pub const DESTROY_INSTANCES: &str = "destroy-instances";
pub const CREATE_CONTROL_PLANE: &str = "create-control-plane";
pub const DELETE_CONTROL_PLANE: &str = "delete-control-plane";
pub const CORDON_NODES: &str = "cordon-nodes";
pub const UNCORDON_NODES: &str = "uncordon-nodes";
pub const RUN_PRE_SCRIPT: &str = "run-pre-script";
pub const RUN_POST_SCRIPT: &str = "run-post-script";
pub const RUN_PLATFORM_WORKFLOW: &str = "run-platform-workflow";
pub const ATTACH_NODES: &str = "attach-nodes";
pub const REMOVE_NODES: &str = "remove-nodes";
pub const VERIFY_NODES: &str = "verify-nodes";
pub const DELETE_NODE_GROUP: &str = "delete-node-group";

/// Per-step parameter keys.
pub mod param {
    /// `"true"` when nodes join unschedulable.
    pub const CORDONED: &str = "cordoned";
    pub const WORKFLOW_ID: &str = "workflowID";
    /// Comma-joined master IPs.
    pub const MASTERS: &str = "masters";
    /// Consumer identity for returning devices.
    pub const SYSTEM_ID: &str = "systemID";
}

pub const SUBSYSTEM_POOL: &str = "resource-pool";
pub const SUBSYSTEM_CLUSTER: &str = "cluster";

/// Collaborators the resource-pool steps need.
#[derive(Clone)]
pub struct StepDeps {
    pub pool: Arc<ResourcePoolClient>,
    pub quota: Arc<QuotaAllocator>,
    pub node_groups: Arc<dyn NodeGroupStore>,
    pub cluster: Arc<dyn ClusterOps>,
}

pub fn register_resource_pool_steps(registry: &mut StepRegistry, deps: &StepDeps) -> Result<(), FlowError> {
    registry.register(
        APPLY_INSTANCES,
        Arc::new(ApplyInstancesStep::new(
            Arc::clone(&deps.pool),
            Arc::clone(&deps.quota),
            Arc::clone(&deps.node_groups),
        )),
    )?;
    registry.register(DESTROY_INSTANCES, Arc::new(DestroyInstancesStep::new(Arc::clone(&deps.pool))))?;

    let cluster_steps = [
        (CREATE_CONTROL_PLANE, ClusterAction::CreateControlPlane),
        (DELETE_CONTROL_PLANE, ClusterAction::DeleteControlPlane),
        (CORDON_NODES, ClusterAction::Cordon),
        (UNCORDON_NODES, ClusterAction::Uncordon),
        (RUN_PRE_SCRIPT, ClusterAction::PreScript),
        (RUN_POST_SCRIPT, ClusterAction::PostScript),
        (RUN_PLATFORM_WORKFLOW, ClusterAction::Workflow),
        (ATTACH_NODES, ClusterAction::Attach),
        (REMOVE_NODES, ClusterAction::Remove),
        (VERIFY_NODES, ClusterAction::Verify),
        (DELETE_NODE_GROUP, ClusterAction::DeleteNodeGroup),
    ];
    for (step_id, action) in cluster_steps {
        registry.register(step_id, Arc::new(ClusterStep::new(action, Arc::clone(&deps.cluster))))?;
    }
    Ok(())
}

/// A fully populated resource-pool step table.
pub fn resource_pool_registry(deps: &StepDeps) -> Result<StepRegistry, FlowError> {
    let mut registry = StepRegistry::new(RESOURCE_POOL_PROVIDER);
    register_resource_pool_steps(&mut registry, deps)?;
    Ok(registry)
}
