use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::Parser;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use nodeflow_core::app::{
    ProviderRegistries, ResourcePoolTaskBuilder, StepQueue, TaskAccessor, TaskExecutor, WorkerGroup, submit,
};
use nodeflow_core::config::{EngineConfig, ExecutorConfig, PoolClientConfig};
use nodeflow_core::domain::{
    ConsumeDeviceRequest, DeviceRecord, LaunchTemplate, NodeGroup, Operation, OperationOptions, OperationRequest,
    PoolLinkage, ReturnDeviceRequest, ZoneCapacity,
};
use nodeflow_core::error::FlowError;
use nodeflow_core::impls::{InMemoryNodeGroupStore, InMemoryTaskStore, StaticQuotaSource};
use nodeflow_core::pool::{QuotaAllocator, ResourcePoolClient};
use nodeflow_core::ports::{ClusterOps, ResourcePoolApi, SystemClock, TaskStore, UlidGenerator};
use nodeflow_core::steps::{StepDeps, resource_pool_registry};

/// Runs one scale-up against a simulated resource pool.
#[derive(Debug, Parser)]
#[command(name = "nodeflow", version)]
struct Args {
    /// Engine config (JSON). Defaults to short demo timings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Nodes to add.
    #[arg(long, default_value_t = 2)]
    count: i64,

    /// New nodes join cordoned and are uncordoned after verification.
    #[arg(long)]
    mixed: bool,

    /// Polls before the simulated pool finishes an order.
    #[arg(long, default_value_t = 3)]
    pending_polls: u32,
}

fn demo_config() -> EngineConfig {
    EngineConfig {
        pool: PoolClientConfig {
            submit_attempts: 3,
            submit_retry_delay_ms: 200,
            poll_interval_ms: 300,
            poll_deadline_ms: 30_000,
        },
        executor: ExecutorConfig {
            workers: 2,
            default_step_timeout_secs: Some(60),
        },
    }
}

struct SimulatedOrder {
    polls_left: u32,
    devices: u32,
    offset: u32,
}

/// Orders finish after a fixed number of polls with exactly the desired devices.
struct SimulatedPool {
    pending_polls: u32,
    state: Mutex<(u32, HashMap<String, SimulatedOrder>)>,
}

impl SimulatedPool {
    fn new(pending_polls: u32) -> Self {
        Self {
            pending_polls,
            state: Mutex::new((0, HashMap::new())),
        }
    }
}

#[async_trait]
impl ResourcePoolApi for SimulatedPool {
    async fn consume_device(&self, request: &ConsumeDeviceRequest) -> Result<String, FlowError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (issued, orders) = &mut *state;
        let offset = orders.values().map(|o| o.devices).sum();
        *issued += 1;
        let order_id = format!("consume-{issued}");
        orders.insert(
            order_id.clone(),
            SimulatedOrder {
                polls_left: self.pending_polls,
                devices: request.desired,
                offset,
            },
        );
        info!(pool_id = %request.pool_id, order_id = %order_id, desired = request.desired, "simulated consume order");
        Ok(order_id)
    }

    async fn get_device_record(&self, order_id: &str) -> Result<DeviceRecord, FlowError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let order = state
            .1
            .get_mut(order_id)
            .ok_or_else(|| FlowError::remote("get_device_record", format!("unknown order {order_id}")))?;
        if order.polls_left > 0 {
            order.polls_left -= 1;
            return Ok(DeviceRecord {
                order_id: order_id.to_string(),
                status: "RUNNING".to_string(),
                ..Default::default()
            });
        }
        let range = (order.offset + 1)..=(order.offset + order.devices);
        Ok(DeviceRecord {
            order_id: order_id.to_string(),
            status: "FINISHED".to_string(),
            message: String::new(),
            device_ids: range.clone().map(|i| format!("dev-{i}")).collect(),
            instance_ids: range.clone().map(|i| format!("ins-{i}")).collect(),
            inner_ips: range.map(|i| format!("10.20.0.{i}")).collect(),
        })
    }

    async fn return_device(&self, request: &ReturnDeviceRequest) -> Result<String, FlowError> {
        info!(pool_id = %request.pool_id, devices = ?request.device_ids, "simulated return order");
        Ok(format!("return-{}", request.device_ids.len()))
    }
}

/// Logs every cluster call and succeeds.
struct LoggingClusterOps;

#[async_trait]
impl ClusterOps for LoggingClusterOps {
    async fn create_control_plane(&self, cluster_id: &str, masters: &[String]) -> Result<(), FlowError> {
        info!(cluster_id, ?masters, "create control plane");
        Ok(())
    }

    async fn delete_control_plane(&self, cluster_id: &str) -> Result<(), FlowError> {
        info!(cluster_id, "delete control plane");
        Ok(())
    }

    async fn set_schedulable(&self, cluster_id: &str, node_ips: &[String], cordon: bool) -> Result<(), FlowError> {
        info!(cluster_id, ?node_ips, cordon, "set schedulable");
        Ok(())
    }

    async fn run_script(&self, cluster_id: &str, node_ips: &[String], script: &str) -> Result<(), FlowError> {
        info!(cluster_id, ?node_ips, script, "run script");
        Ok(())
    }

    async fn run_workflow(&self, cluster_id: &str, workflow_id: &str, node_ips: &[String]) -> Result<(), FlowError> {
        info!(cluster_id, workflow_id, ?node_ips, "run workflow");
        Ok(())
    }

    async fn attach_nodes(
        &self,
        cluster_id: &str,
        node_group_id: Option<&str>,
        node_ips: &[String],
        cordoned: bool,
    ) -> Result<(), FlowError> {
        info!(cluster_id, ?node_group_id, ?node_ips, cordoned, "attach nodes");
        Ok(())
    }

    async fn remove_nodes(&self, cluster_id: &str, node_ips: &[String]) -> Result<(), FlowError> {
        info!(cluster_id, ?node_ips, "remove nodes");
        Ok(())
    }

    async fn verify_nodes(&self, cluster_id: &str, node_ips: &[String]) -> Result<(), FlowError> {
        info!(cluster_id, ?node_ips, "verify nodes");
        Ok(())
    }

    async fn delete_node_group(&self, cluster_id: &str, node_group_id: &str) -> Result<(), FlowError> {
        info!(cluster_id, node_group_id, "delete node group");
        Ok(())
    }
}

fn demo_node_group() -> NodeGroup {
    NodeGroup {
        id: "ng-demo".into(),
        cluster_id: "cls-demo".into(),
        zones: vec![],
        pool: Some(PoolLinkage {
            pool_id: "pool-demo".into(),
            system_id: "sys-demo".into(),
        }),
        launch_template: Some(LaunchTemplate {
            region: "ap-guangzhou".into(),
            instance_type: "S5.MEDIUM4".into(),
            cpu: 2,
            memory_gb: 4,
            image_id: "img-demo".into(),
            ..Default::default()
        }),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(demo_config());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(EngineConfig::from_json_str(&raw)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    // (A) ports
    let store = Arc::new(InMemoryTaskStore::new());
    let node_groups = InMemoryNodeGroupStore::new();
    node_groups.insert(demo_node_group());
    let quota_source = StaticQuotaSource::new();
    quota_source.set(
        "ap-guangzhou",
        "S5.MEDIUM4",
        vec![ZoneCapacity {
            zone: "ap-guangzhou-3".into(),
            oversold_total: 100,
            oversold_available: 100,
            group_quota: 0,
            group_used: 0,
        }],
    );

    // (B) steps, builder, executor
    let deps = StepDeps {
        pool: Arc::new(ResourcePoolClient::new(
            Arc::new(SimulatedPool::new(args.pending_polls)),
            &config.pool,
        )),
        quota: Arc::new(QuotaAllocator::new(Arc::new(quota_source))),
        node_groups: Arc::new(node_groups.clone()),
        cluster: Arc::new(LoggingClusterOps),
    };
    let registry = Arc::new(resource_pool_registry(&deps)?);
    let mut registries = ProviderRegistries::new();
    registries.insert(Arc::clone(&registry))?;

    let builder = ResourcePoolTaskBuilder::new(
        registry,
        Arc::new(node_groups),
        Arc::new(UlidGenerator::new(SystemClock)),
        Arc::new(SystemClock),
    );
    let accessor = Arc::new(TaskAccessor::new(store.clone(), Arc::new(SystemClock)));
    let cancel = CancellationToken::new();
    let executor = Arc::new(
        TaskExecutor::new(accessor, Arc::new(registries), &config.executor).with_cancellation(cancel.child_token()),
    );

    // (C) workers
    let queue = StepQueue::new();
    let workers = WorkerGroup::spawn(config.executor.workers.max(1), queue.clone(), executor, cancel);

    // (D) submit
    let request = OperationRequest {
        cluster_id: "cls-demo".into(),
        project_id: "proj-demo".into(),
        cloud_id: "resource-pool".into(),
        operator: "nodeflow-cli".into(),
        operation: Operation::ScaleUpNodeGroup {
            node_group_id: "ng-demo".into(),
            count: args.count,
        },
        options: OperationOptions {
            mixed_deployment: args.mixed,
            ..Default::default()
        },
    };
    let task_id = submit(&builder, store.as_ref(), &queue, &request).await?;

    // (E) wait for a terminal status
    let task = loop {
        let task = store
            .get(&task_id)
            .await?
            .with_context(|| format!("task {task_id} disappeared"))?;
        if task.status.is_terminal() {
            break task;
        }
        sleep(Duration::from_millis(100)).await;
    };
    workers.shutdown_and_join().await;

    for step_id in &task.step_sequence {
        if let Some(step) = task.step(step_id) {
            info!(step = %step.id, status = ?step.status, error = ?step.last_error, "step");
        }
    }
    info!(task_id = %task.id, status = ?task.status, common = ?task.common, "task finished");
    if !matches!(task.status, nodeflow_core::domain::TaskStatus::Success) {
        bail!("task {} ended as {:?}: {}", task.id, task.status, task.message.unwrap_or_default());
    }
    Ok(())
}
