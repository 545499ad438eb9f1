//! TaskBuilder - operation request から Task を組み立てる
//!
//! # Fail-fast 設計
//! - 参照（cluster / node group / cloud / operator）が欠けていれば Validation
//! - 出力するステップ ID が provider の StepRegistry に無ければ Config（起動時の配線ミス）
//! - ステップ 0 個の Task は作らない
//!
//! # 組み立て
//! 操作ごとに再利用可能なステップの部分列を選び、オプション
//! （manual / pre・post script / workflow / mixed deployment）で条件付きに追加する。
//! 追加しなかったステップは単に並びから消えるだけで、順序は詰まったまま。

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::registry::StepRegistry;
use crate::domain::{
    CommonKey, NodeGroup, Operation, OperationOptions, OperationRequest, PoolLinkage, Step, StepId,
    Task, TaskTarget,
};
use crate::error::FlowError;
use crate::ports::{Clock, IdGenerator, NodeGroupStore};
use crate::steps::{self, param};

/// Node verification gets a bounded window.
const VERIFY_NODES_LIMIT: Duration = Duration::from_secs(20 * 60);

#[async_trait]
pub trait TaskBuilder: Send + Sync {
    fn provider(&self) -> &str;

    /// A new, not yet persisted Task whose current step is its first step.
    async fn build(&self, request: &OperationRequest) -> Result<Task, FlowError>;
}

/// Builder for clusters whose nodes come from the self-hosted device pool.
pub struct ResourcePoolTaskBuilder {
    registry: Arc<StepRegistry>,
    node_groups: Arc<dyn NodeGroupStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

/// Steps plus the common parameters they need, accumulated in order.
#[derive(Default)]
struct Plan {
    steps: Vec<Step>,
    seeds: Vec<(CommonKey, String)>,
}

impl Plan {
    fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    fn push_if(&mut self, cond: bool, step: impl FnOnce() -> Step) {
        if cond {
            self.steps.push(step());
        }
    }

    fn seed(&mut self, key: CommonKey, value: impl Into<String>) {
        self.seeds.push((key, value.into()));
    }

    fn seed_list(&mut self, key: CommonKey, values: &[String]) {
        self.seeds.push((key, values.join(",")));
    }
}

fn pool_step(id: &str, label: &str) -> Step {
    Step::new(StepId::from(id), label, steps::SUBSYSTEM_POOL)
}

fn cluster_step(id: &str, label: &str) -> Step {
    Step::new(StepId::from(id), label, steps::SUBSYSTEM_CLUSTER)
}

fn attach_step(options: &OperationOptions) -> Step {
    let step = cluster_step(steps::ATTACH_NODES, "attach nodes to cluster");
    if options.mixed_deployment {
        step.with_param(param::CORDONED, "true")
    } else {
        step
    }
}

fn verify_step() -> Step {
    cluster_step(steps::VERIFY_NODES, "verify node status").with_max_execution(VERIFY_NODES_LIMIT)
}

fn workflow_step(workflow_id: &str) -> Step {
    cluster_step(steps::RUN_PLATFORM_WORKFLOW, "run platform workflow")
        .with_param(param::WORKFLOW_ID, workflow_id)
}

fn destroy_step(linkage: &PoolLinkage) -> Step {
    pool_step(steps::DESTROY_INSTANCES, "return devices to resource pool")
        .with_param(param::SYSTEM_ID, linkage.system_id.as_str())
}

fn require_non_empty(value: &str, what: &str) -> Result<(), FlowError> {
    if value.trim().is_empty() {
        return Err(FlowError::validation(format!("{what} is required")));
    }
    Ok(())
}

fn validate_ips(ips: &[String], what: &str) -> Result<(), FlowError> {
    for ip in ips {
        if ip.trim().parse::<IpAddr>().is_err() {
            return Err(FlowError::validation(format!("{what}: {ip:?} is not an IP address")));
        }
    }
    Ok(())
}

fn require_linkage(group: &NodeGroup) -> Result<&PoolLinkage, FlowError> {
    group.pool.as_ref().ok_or_else(|| {
        FlowError::validation(format!("node group {} is not linked to a resource pool", group.id))
    })
}

impl ResourcePoolTaskBuilder {
    pub fn new(
        registry: Arc<StepRegistry>,
        node_groups: Arc<dyn NodeGroupStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            node_groups,
            ids,
            clock,
        }
    }

    async fn node_group(&self, request: &OperationRequest, node_group_id: &str) -> Result<NodeGroup, FlowError> {
        require_non_empty(node_group_id, "node group id")?;
        let group = self
            .node_groups
            .get_node_group(node_group_id)
            .await?
            .ok_or_else(|| FlowError::not_found("node group", node_group_id))?;
        if group.cluster_id != request.cluster_id {
            return Err(FlowError::validation(format!(
                "node group {node_group_id} belongs to cluster {}, not {}",
                group.cluster_id, request.cluster_id
            )));
        }
        Ok(group)
    }

    async fn plan(&self, request: &OperationRequest) -> Result<Plan, FlowError> {
        let options = &request.options;
        let mut plan = Plan::default();

        match &request.operation {
            Operation::CreateCluster {
                independent,
                masters,
                nodes,
            } => {
                if *independent && masters.is_empty() {
                    return Err(FlowError::validation(
                        "independent cluster creation needs at least one master",
                    ));
                }
                validate_ips(masters, "masters")?;
                validate_ips(nodes, "nodes")?;

                plan.push(
                    cluster_step(steps::CREATE_CONTROL_PLANE, "create control plane")
                        .with_param(param::MASTERS, masters.join(",")),
                );
                if !nodes.is_empty() {
                    plan.seed_list(CommonKey::NodeIps, nodes);
                    plan.push(attach_step(options));
                    plan.push_if(options.post_script.is_some(), || {
                        cluster_step(steps::RUN_POST_SCRIPT, "run post-install script")
                    });
                    plan.push(verify_step());
                }
            }

            Operation::DeleteCluster { device_ids, pool } => {
                plan.push(cluster_step(steps::DELETE_CONTROL_PLANE, "delete control plane"));
                if !device_ids.is_empty() {
                    let linkage = pool.as_ref().ok_or_else(|| {
                        FlowError::validation("returning devices needs a resource pool linkage")
                    })?;
                    plan.seed(CommonKey::PoolId, linkage.pool_id.as_str());
                    plan.seed_list(CommonKey::DeviceIds, device_ids);
                    plan.push(destroy_step(linkage));
                }
            }

            Operation::AddNodesToCluster { node_ips } => {
                if node_ips.is_empty() {
                    return Err(FlowError::validation("node IPs are required"));
                }
                validate_ips(node_ips, "node IPs")?;
                plan.seed_list(CommonKey::NodeIps, node_ips);

                plan.push_if(options.pre_script.is_some(), || {
                    cluster_step(steps::RUN_PRE_SCRIPT, "run pre-install script")
                });
                plan.push(attach_step(options));
                plan.push_if(options.post_script.is_some(), || {
                    cluster_step(steps::RUN_POST_SCRIPT, "run post-install script")
                });
                if let Some(workflow_id) = &options.workflow_id {
                    plan.push(workflow_step(workflow_id));
                }
                plan.push(verify_step());
                plan.push_if(options.mixed_deployment, || {
                    cluster_step(steps::UNCORDON_NODES, "uncordon nodes").skip_on_failed()
                });
            }

            Operation::ScaleUpNodeGroup { node_group_id, count } => {
                if *count <= 0 {
                    return Err(FlowError::validation(format!(
                        "scale-up count must be positive, got {count}"
                    )));
                }
                let group = self.node_group(request, node_group_id).await?;
                let linkage = require_linkage(&group)?;
                plan.seed(CommonKey::PoolId, linkage.pool_id.as_str());
                plan.seed(CommonKey::ScaleCount, count.to_string());

                plan.push(pool_step(steps::APPLY_INSTANCES, "apply instances from resource pool"));
                plan.push_if(options.pre_script.is_some(), || {
                    cluster_step(steps::RUN_PRE_SCRIPT, "run pre-install script")
                });
                plan.push(attach_step(options));
                plan.push_if(options.post_script.is_some(), || {
                    cluster_step(steps::RUN_POST_SCRIPT, "run post-install script")
                });
                if let Some(workflow_id) = &options.workflow_id {
                    plan.push(workflow_step(workflow_id));
                }
                plan.push(verify_step());
                plan.push_if(options.mixed_deployment, || {
                    cluster_step(steps::UNCORDON_NODES, "uncordon nodes").skip_on_failed()
                });
            }

            Operation::ScaleDownNodeGroup {
                node_group_id,
                node_ips,
                device_ids,
            } => {
                if node_ips.is_empty() || device_ids.is_empty() {
                    return Err(FlowError::validation(
                        "scale-down needs both node IPs and device IDs",
                    ));
                }
                validate_ips(node_ips, "node IPs")?;
                let group = self.node_group(request, node_group_id).await?;
                let linkage = require_linkage(&group)?;
                plan.seed(CommonKey::PoolId, linkage.pool_id.as_str());
                plan.seed_list(CommonKey::NodeIps, node_ips);
                plan.seed_list(CommonKey::DeviceIds, device_ids);

                plan.push_if(options.manual, || cluster_step(steps::CORDON_NODES, "cordon nodes"));
                plan.push_if(options.pre_script.is_some(), || {
                    cluster_step(steps::RUN_PRE_SCRIPT, "run pre-delete script")
                });
                if let Some(workflow_id) = &options.workflow_id {
                    plan.push(workflow_step(workflow_id));
                }
                plan.push(cluster_step(steps::REMOVE_NODES, "remove nodes from cluster"));
                plan.push(destroy_step(linkage));
            }

            Operation::DeleteNodeGroup {
                node_group_id,
                node_ips,
                device_ids,
            } => {
                validate_ips(node_ips, "node IPs")?;
                let group = self.node_group(request, node_group_id).await?;

                if !node_ips.is_empty() {
                    plan.seed_list(CommonKey::NodeIps, node_ips);
                    plan.push(cluster_step(steps::CORDON_NODES, "cordon nodes"));
                    plan.push(cluster_step(steps::REMOVE_NODES, "remove nodes from cluster"));
                }
                if !device_ids.is_empty() {
                    let linkage = require_linkage(&group)?;
                    plan.seed(CommonKey::PoolId, linkage.pool_id.as_str());
                    plan.seed_list(CommonKey::DeviceIds, device_ids);
                    plan.push(destroy_step(linkage));
                }
                plan.push(cluster_step(steps::DELETE_NODE_GROUP, "delete node group"));
            }
        }

        Ok(plan)
    }
}

#[async_trait]
impl TaskBuilder for ResourcePoolTaskBuilder {
    fn provider(&self) -> &str {
        self.registry.provider()
    }

    async fn build(&self, request: &OperationRequest) -> Result<Task, FlowError> {
        require_non_empty(&request.cluster_id, "cluster id")?;
        require_non_empty(&request.cloud_id, "cloud id")?;
        require_non_empty(&request.operator, "operator")?;

        let plan = self.plan(request).await?;
        if plan.steps.is_empty() {
            return Err(FlowError::config(format!(
                "{} produced no steps",
                request.operation.kind()
            )));
        }
        let missing = self.registry.missing(plan.steps.iter().map(|s| &s.id));
        if !missing.is_empty() {
            return Err(FlowError::config(format!(
                "steps {missing:?} are not registered for provider '{}'",
                self.registry.provider()
            )));
        }

        let kind = request.operation.kind();
        let node_group_id = request.operation.node_group_id().map(str::to_string);
        let target = TaskTarget {
            cluster_id: request.cluster_id.clone(),
            node_group_id: node_group_id.clone(),
            project_id: request.project_id.clone(),
        };
        let mut task = Task::new(
            self.ids.generate_task_id(),
            kind,
            self.registry.provider(),
            target,
            request.operator.as_str(),
            self.clock.now(),
        );

        task.common.set(CommonKey::OperationType, kind.as_str());
        task.common.set(CommonKey::Operator, request.operator.as_str());
        task.common.set(CommonKey::ClusterId, request.cluster_id.as_str());
        task.common.set(CommonKey::CloudId, request.cloud_id.as_str());
        if !request.project_id.is_empty() {
            task.common.set(CommonKey::ProjectId, request.project_id.as_str());
        }
        if let Some(node_group_id) = node_group_id {
            task.common.set(CommonKey::NodeGroupId, node_group_id);
        }
        if let Some(script) = &request.options.pre_script {
            task.common.set(CommonKey::PreScript, script.as_str());
        }
        if let Some(script) = &request.options.post_script {
            task.common.set(CommonKey::PostScript, script.as_str());
        }
        for (key, value) in plan.seeds {
            task.common.set(key, value);
        }

        for step in plan.steps {
            let id = step.id.clone();
            if !task.push_step(step) {
                return Err(FlowError::config(format!("step {id} appears twice in {kind}")));
            }
        }

        info!(
            task_id = %task.id,
            operation = %kind,
            cluster_id = %request.cluster_id,
            steps = ?task.step_sequence,
            "task built"
        );
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OperationType, TaskStatus};
    use crate::testing::{StepFixture, request};
    use rstest::rstest;

    fn ids(task: &Task) -> Vec<&str> {
        task.step_sequence.iter().map(StepId::as_str).collect()
    }

    #[tokio::test]
    async fn default_scale_up_is_apply_attach_verify() {
        let fx = StepFixture::new();
        let builder = fx.builder();
        let req = request(
            Operation::ScaleUpNodeGroup {
                node_group_id: "ng-1".into(),
                count: 2,
            },
            OperationOptions::default(),
        );

        let task = builder.build(&req).await.unwrap();

        assert_eq!(ids(&task), vec![steps::APPLY_INSTANCES, steps::ATTACH_NODES, steps::VERIFY_NODES]);
        assert_eq!(task.current_step, Some(StepId::from(steps::APPLY_INSTANCES)));
        assert_eq!(task.status, TaskStatus::Init);
        assert_eq!(task.operation, OperationType::ScaleUpNodeGroup);
        assert_eq!(task.common.get(CommonKey::ScaleCount), Some("2"));
        assert_eq!(task.common.get(CommonKey::PoolId), Some("pool-1"));
        assert_eq!(task.common.get(CommonKey::NodeGroupId), Some("ng-1"));
        assert_eq!(task.common.get(CommonKey::Operator), Some("alice"));
        assert_eq!(task.common.get(CommonKey::OperationType), Some("scale_up_node_group"));
    }

    #[tokio::test]
    async fn options_add_steps_without_gaps() {
        let fx = StepFixture::new();
        let req = request(
            Operation::ScaleUpNodeGroup {
                node_group_id: "ng-1".into(),
                count: 1,
            },
            OperationOptions {
                pre_script: Some("echo pre".into()),
                post_script: Some("echo post".into()),
                workflow_id: Some("wf-1".into()),
                mixed_deployment: true,
                ..Default::default()
            },
        );

        let task = fx.builder().build(&req).await.unwrap();
        assert_eq!(
            ids(&task),
            vec![
                steps::APPLY_INSTANCES,
                steps::RUN_PRE_SCRIPT,
                steps::ATTACH_NODES,
                steps::RUN_POST_SCRIPT,
                steps::RUN_PLATFORM_WORKFLOW,
                steps::VERIFY_NODES,
                steps::UNCORDON_NODES,
            ]
        );
        let attach = task.step(&StepId::from(steps::ATTACH_NODES)).unwrap();
        assert_eq!(attach.param(param::CORDONED), Some("true"));
        assert!(task.step(&StepId::from(steps::UNCORDON_NODES)).unwrap().skip_on_failed);
        assert_eq!(task.common.get(CommonKey::PostScript), Some("echo post"));
    }

    #[tokio::test]
    async fn scale_down_cordons_only_when_manual() {
        let fx = StepFixture::new();
        let op = Operation::ScaleDownNodeGroup {
            node_group_id: "ng-1".into(),
            node_ips: vec!["10.0.0.5".into()],
            device_ids: vec!["dev-5".into()],
        };

        let auto = fx.builder().build(&request(op.clone(), OperationOptions::default())).await.unwrap();
        assert_eq!(ids(&auto), vec![steps::REMOVE_NODES, steps::DESTROY_INSTANCES]);

        let manual = OperationOptions {
            manual: true,
            ..Default::default()
        };
        let task = fx.builder().build(&request(op, manual)).await.unwrap();
        assert_eq!(ids(&task), vec![steps::CORDON_NODES, steps::REMOVE_NODES, steps::DESTROY_INSTANCES]);
        let destroy = task.step(&StepId::from(steps::DESTROY_INSTANCES)).unwrap();
        assert_eq!(destroy.param(param::SYSTEM_ID), Some("sys-1"));
        assert_eq!(task.common.get(CommonKey::DeviceIds), Some("dev-5"));
    }

    #[tokio::test]
    async fn create_cluster_compositions() {
        let fx = StepFixture::new();
        let managed = request(
            Operation::CreateCluster {
                independent: false,
                masters: vec![],
                nodes: vec![],
            },
            OperationOptions::default(),
        );
        let task = fx.builder().build(&managed).await.unwrap();
        assert_eq!(ids(&task), vec![steps::CREATE_CONTROL_PLANE]);

        let with_nodes = request(
            Operation::CreateCluster {
                independent: true,
                masters: vec!["10.0.0.1".into()],
                nodes: vec!["10.0.0.2".into()],
            },
            OperationOptions::default(),
        );
        let task = fx.builder().build(&with_nodes).await.unwrap();
        assert_eq!(
            ids(&task),
            vec![steps::CREATE_CONTROL_PLANE, steps::ATTACH_NODES, steps::VERIFY_NODES]
        );
    }

    #[tokio::test]
    async fn delete_node_group_returns_devices_then_deletes() {
        let fx = StepFixture::new();
        let req = request(
            Operation::DeleteNodeGroup {
                node_group_id: "ng-1".into(),
                node_ips: vec!["10.0.0.5".into()],
                device_ids: vec!["dev-5".into()],
            },
            OperationOptions::default(),
        );
        let task = fx.builder().build(&req).await.unwrap();
        assert_eq!(
            ids(&task),
            vec![
                steps::CORDON_NODES,
                steps::REMOVE_NODES,
                steps::DESTROY_INSTANCES,
                steps::DELETE_NODE_GROUP,
            ]
        );
    }

    #[rstest]
    #[case::independent_without_masters(
        Operation::CreateCluster { independent: true, masters: vec![], nodes: vec![] }
    )]
    #[case::zero_scale_up(Operation::ScaleUpNodeGroup { node_group_id: "ng-1".into(), count: 0 })]
    #[case::missing_node_group_id(Operation::ScaleUpNodeGroup { node_group_id: "".into(), count: 1 })]
    #[case::bad_ip(Operation::AddNodesToCluster { node_ips: vec!["10.0.0.300".into()] })]
    #[case::no_ips(Operation::AddNodesToCluster { node_ips: vec![] })]
    #[case::scale_down_without_devices(Operation::ScaleDownNodeGroup {
        node_group_id: "ng-1".into(),
        node_ips: vec!["10.0.0.5".into()],
        device_ids: vec![],
    })]
    #[case::devices_without_pool(Operation::DeleteCluster { device_ids: vec!["dev-1".into()], pool: None })]
    #[case::group_of_another_cluster(Operation::ScaleUpNodeGroup { node_group_id: "ng-other".into(), count: 1 })]
    #[case::group_without_pool(Operation::ScaleUpNodeGroup { node_group_id: "ng-unlinked".into(), count: 1 })]
    #[tokio::test]
    async fn invalid_requests_are_rejected(#[case] op: Operation) {
        let fx = StepFixture::new();
        let err = fx.builder().build(&request(op, OperationOptions::default())).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_references_are_rejected() {
        let fx = StepFixture::new();
        let mut req = request(
            Operation::AddNodesToCluster {
                node_ips: vec!["10.0.0.5".into()],
            },
            OperationOptions::default(),
        );
        req.operator = "  ".into();
        assert!(matches!(fx.builder().build(&req).await, Err(FlowError::Validation(_))));

        let unknown = request(
            Operation::ScaleUpNodeGroup {
                node_group_id: "ng-ghost".into(),
                count: 1,
            },
            OperationOptions::default(),
        );
        assert!(matches!(
            fx.builder().build(&unknown).await,
            Err(FlowError::NotFound { kind: "node group", .. })
        ));
    }

    #[tokio::test]
    async fn unregistered_step_is_a_config_error() {
        let fx = StepFixture::new();
        let mut partial = StepRegistry::new(steps::RESOURCE_POOL_PROVIDER);
        partial
            .register(steps::APPLY_INSTANCES, Arc::new(crate::testing::NoopStep))
            .unwrap();
        let builder = fx.builder_with(Arc::new(partial));
        let req = request(
            Operation::ScaleUpNodeGroup {
                node_group_id: "ng-1".into(),
                count: 1,
            },
            OperationOptions::default(),
        );

        let err = builder.build(&req).await.unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
