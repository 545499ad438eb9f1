//! Pool-backed steps: apply instances for a scale-up, return devices on the
//! way down.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::param;
use crate::app::accessor::StepContext;
use crate::app::registry::StepHandler;
use crate::domain::{CommonKey, InstanceSpec};
use crate::error::FlowError;
use crate::pool::{QuotaAllocator, ResourcePoolClient};
use crate::ports::NodeGroupStore;

/// Quota check, apply order, wait for devices.
///
/// Resumable: once `applyOrderID` is persisted, a re-run polls that order
/// instead of submitting (and quota-checking) again.
pub struct ApplyInstancesStep {
    pool: Arc<ResourcePoolClient>,
    quota: Arc<QuotaAllocator>,
    node_groups: Arc<dyn NodeGroupStore>,
}

impl ApplyInstancesStep {
    pub fn new(
        pool: Arc<ResourcePoolClient>,
        quota: Arc<QuotaAllocator>,
        node_groups: Arc<dyn NodeGroupStore>,
    ) -> Self {
        Self {
            pool,
            quota,
            node_groups,
        }
    }
}

fn scale_count(ctx: &StepContext) -> Result<u32, FlowError> {
    let raw = ctx.require(CommonKey::ScaleCount)?;
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(FlowError::handler(format!("invalid scaleCount {raw:?}"))),
    }
}

#[async_trait]
impl StepHandler for ApplyInstancesStep {
    async fn execute(&self, ctx: &mut StepContext) -> Result<(), FlowError> {
        let task_id = ctx.task_id();
        let node_group_id = ctx.require(CommonKey::NodeGroupId)?.to_string();
        let desired = scale_count(ctx)?;

        let group = self
            .node_groups
            .get_node_group(&node_group_id)
            .await?
            .ok_or_else(|| FlowError::not_found("node group", &node_group_id))?;
        let linkage = group.pool.clone().ok_or_else(|| {
            FlowError::handler(format!("node group {node_group_id} has no resource pool linkage"))
        })?;
        let pool_id = ctx
            .common()
            .get(CommonKey::PoolId)
            .unwrap_or(linkage.pool_id.as_str())
            .to_string();

        let persisted = ctx.common().get(CommonKey::ApplyOrderId).map(str::to_string);
        let order_id = match persisted {
            Some(existing) => {
                info!(task_id = %task_id, order_id = %existing, "resuming apply order");
                existing
            }
            None => {
                let template = group.launch_template.clone().ok_or_else(|| {
                    FlowError::handler(format!("node group {node_group_id} has no launch template"))
                })?;
                let decision = self.quota.check_quota(&group, desired as i64).await?;
                let spec = InstanceSpec::from_template(&template, group.declared_zones())
                    .with_zone_split(decision.zone_split().to_vec());

                let order = self.pool.apply_instances(&pool_id, desired, &spec).await?;
                ctx.set_common(CommonKey::ApplyOrderId, order.order_id.clone());
                ctx.save().await?;
                order.order_id
            }
        };

        let cancel = ctx.cancellation().clone();
        let devices = match self.pool.check_order_status(&order_id, &cancel).await {
            Ok(devices) => devices,
            // settled as failed (or finished unusable): a retry submits a new order
            Err(e @ FlowError::Remote { .. }) => {
                warn!(task_id = %task_id, order_id = %order_id, error = %e, "apply order failed, forgetting it");
                ctx.remove_common(CommonKey::ApplyOrderId);
                return Err(e);
            }
            // Timeout / Cancelled: the order may still finish, keep polling it on resume
            Err(e) => return Err(e),
        };

        if devices.len() < desired as usize {
            warn!(
                task_id = %task_id,
                order_id = %order_id,
                got = devices.len(),
                desired,
                "apply order came back short, returning devices"
            );
            let operator = ctx.common().get(CommonKey::Operator).unwrap_or_default().to_string();
            match self
                .pool
                .destroy_instances(&pool_id, &linkage.system_id, &devices.device_ids, &operator)
                .await
            {
                Ok(return_order) => ctx.set_common(CommonKey::DestroyOrderId, return_order),
                Err(e) => error!(task_id = %task_id, order_id = %order_id, error = %e, "returning short order failed"),
            }
            // a resubmission starts a fresh order
            ctx.remove_common(CommonKey::ApplyOrderId);
            return Err(FlowError::remote(
                format!("order {order_id}"),
                format!("produced {} of {desired} devices", devices.len()),
            ));
        }

        ctx.set_common_list(CommonKey::DeviceIds, devices.device_ids.as_slice());
        ctx.set_common_list(CommonKey::InstanceIds, devices.instance_ids.as_slice());
        ctx.set_common_list(CommonKey::NodeIps, devices.node_ips.as_slice());
        info!(task_id = %task_id, order_id = %order_id, devices = devices.len(), "instances applied");
        Ok(())
    }
}

/// Submits a return order for `deviceIDs`. Resumable through `destroyOrderID`.
pub struct DestroyInstancesStep {
    pool: Arc<ResourcePoolClient>,
}

impl DestroyInstancesStep {
    pub fn new(pool: Arc<ResourcePoolClient>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StepHandler for DestroyInstancesStep {
    async fn execute(&self, ctx: &mut StepContext) -> Result<(), FlowError> {
        let task_id = ctx.task_id();
        if let Some(order_id) = ctx.common().get(CommonKey::DestroyOrderId) {
            info!(task_id = %task_id, order_id, "return order already submitted");
            return Ok(());
        }
        let device_ids = ctx.common().get_list(CommonKey::DeviceIds);
        if device_ids.is_empty() {
            info!(task_id = %task_id, "no devices to return");
            return Ok(());
        }

        let pool_id = ctx.require(CommonKey::PoolId)?.to_string();
        let system_id = ctx
            .step_param(param::SYSTEM_ID)
            .ok_or_else(|| FlowError::handler(format!("step {} has no {}", ctx.step_id(), param::SYSTEM_ID)))?
            .to_string();
        let operator = ctx.common().get(CommonKey::Operator).unwrap_or_default().to_string();

        let order_id = self
            .pool
            .destroy_instances(&pool_id, &system_id, &device_ids, &operator)
            .await?;
        ctx.set_common(CommonKey::DestroyOrderId, order_id);
        Ok(())
    }
}
