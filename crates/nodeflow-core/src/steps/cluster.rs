//! Cluster-side steps. One handler type, dispatched on [`ClusterAction`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::param;
use crate::app::accessor::StepContext;
use crate::app::registry::StepHandler;
use crate::domain::CommonKey;
use crate::error::FlowError;
use crate::ports::ClusterOps;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAction {
    CreateControlPlane,
    DeleteControlPlane,
    Cordon,
    Uncordon,
    PreScript,
    PostScript,
    Workflow,
    Attach,
    Remove,
    Verify,
    DeleteNodeGroup,
}

pub struct ClusterStep {
    action: ClusterAction,
    ops: Arc<dyn ClusterOps>,
}

impl ClusterStep {
    pub fn new(action: ClusterAction, ops: Arc<dyn ClusterOps>) -> Self {
        Self { action, ops }
    }
}

#[async_trait]
impl StepHandler for ClusterStep {
    async fn execute(&self, ctx: &mut StepContext) -> Result<(), FlowError> {
        let cluster_id = ctx.require(CommonKey::ClusterId)?.to_string();
        let node_ips = ctx.common().get_list(CommonKey::NodeIps);
        let ops = self.ops.as_ref();

        match self.action {
            ClusterAction::CreateControlPlane => {
                let masters: Vec<String> = ctx
                    .step_param(param::MASTERS)
                    .map(|m| m.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                    .unwrap_or_default();
                ops.create_control_plane(&cluster_id, &masters).await?;
            }
            ClusterAction::DeleteControlPlane => ops.delete_control_plane(&cluster_id).await?,
            ClusterAction::Cordon => ops.set_schedulable(&cluster_id, &node_ips, true).await?,
            ClusterAction::Uncordon => ops.set_schedulable(&cluster_id, &node_ips, false).await?,
            ClusterAction::PreScript | ClusterAction::PostScript => {
                let key = if self.action == ClusterAction::PreScript {
                    CommonKey::PreScript
                } else {
                    CommonKey::PostScript
                };
                match ctx.common().get(key) {
                    Some(script) => ops.run_script(&cluster_id, &node_ips, script).await?,
                    None => info!(task_id = %ctx.task_id(), step = %ctx.step_id(), "no script configured"),
                }
            }
            ClusterAction::Workflow => {
                let workflow_id = ctx
                    .step_param(param::WORKFLOW_ID)
                    .ok_or_else(|| FlowError::handler(format!("step {} has no {}", ctx.step_id(), param::WORKFLOW_ID)))?;
                ops.run_workflow(&cluster_id, workflow_id, &node_ips).await?;
            }
            ClusterAction::Attach => {
                let cordoned = ctx.step_param(param::CORDONED) == Some("true");
                let node_group_id = ctx.common().get(CommonKey::NodeGroupId);
                ops.attach_nodes(&cluster_id, node_group_id, &node_ips, cordoned).await?;
            }
            ClusterAction::Remove => ops.remove_nodes(&cluster_id, &node_ips).await?,
            ClusterAction::Verify => ops.verify_nodes(&cluster_id, &node_ips).await?,
            ClusterAction::DeleteNodeGroup => {
                let node_group_id = ctx.require(CommonKey::NodeGroupId)?;
                ops.delete_node_group(&cluster_id, node_group_id).await?;
            }
        }
        Ok(())
    }
}
