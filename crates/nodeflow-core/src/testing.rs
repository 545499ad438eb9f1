//! Test doubles and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ulid::Ulid;

use crate::app::{
    ProviderRegistries, ResourcePoolTaskBuilder, StepContext, StepHandler, StepOutcome, StepRegistry,
    TaskAccessor, TaskBuilder, TaskExecutor,
};
use crate::config::{ExecutorConfig, PoolClientConfig};
use crate::domain::{
    CommonKey, ConsumeDeviceRequest, DeviceRecord, LaunchTemplate, NodeGroup, Operation,
    OperationOptions, OperationRequest, OperationType, PoolLinkage, ReturnDeviceRequest, Step, StepId,
    Task, TaskId, TaskTarget, ZoneCapacity,
};
use crate::error::FlowError;
use crate::impls::{InMemoryNodeGroupStore, InMemoryTaskStore, StaticQuotaSource};
use crate::pool::{QuotaAllocator, ResourcePoolClient};
use crate::ports::{Clock, ClusterOps, FixedClock, ResourcePoolApi, SystemClock, TaskStore, UlidGenerator};
use crate::steps::{self, StepDeps};

pub fn fixed_clock() -> FixedClock {
    FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
}

/// 10s polls, 2 minute deadline, 3 submissions 1s apart.
pub fn pool_config() -> PoolClientConfig {
    PoolClientConfig {
        submit_attempts: 3,
        submit_retry_delay_ms: 1_000,
        poll_interval_ms: 10_000,
        poll_deadline_ms: 120_000,
    }
}

pub fn unknown_task_id() -> TaskId {
    TaskId::from_ulid(Ulid::new())
}

pub fn task_with_steps(ids: &[&str]) -> Task {
    let mut task = Task::new(
        unknown_task_id(),
        OperationType::ScaleUpNodeGroup,
        "test",
        TaskTarget {
            cluster_id: "c-1".into(),
            node_group_id: Some("ng-1".into()),
            project_id: "proj-1".into(),
        },
        "alice",
        fixed_clock().now(),
    );
    for id in ids {
        task.push_step(Step::new(StepId::from(*id), *id, "test"));
    }
    task
}

pub fn capacity(zone: &str, total: u64, available: u64, quota: u64) -> ZoneCapacity {
    ZoneCapacity {
        zone: zone.into(),
        oversold_total: total,
        oversold_available: available,
        group_quota: quota,
        group_used: quota,
    }
}

pub fn request(operation: Operation, options: OperationOptions) -> OperationRequest {
    OperationRequest {
        cluster_id: "c-1".into(),
        project_id: "proj-1".into(),
        cloud_id: "pool-cloud".into(),
        operator: "alice".into(),
        operation,
        options,
    }
}

// ---------------------------------------------------------------------------
// handlers

pub struct NoopStep;

#[async_trait]
impl StepHandler for NoopStep {
    async fn execute(&self, _ctx: &mut StepContext) -> Result<(), FlowError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct CountingStep {
    calls: Arc<AtomicUsize>,
}

impl CountingStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> Arc<dyn StepHandler> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepHandler for CountingStep {
    async fn execute(&self, _ctx: &mut StepContext) -> Result<(), FlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails with `message`, optionally only for the first `remaining` calls and
/// optionally after writing one common parameter.
pub struct FailingStep {
    message: String,
    remaining: Option<AtomicUsize>,
    write: Option<(CommonKey, String)>,
}

impl FailingStep {
    pub fn handler(message: &str) -> Arc<dyn StepHandler> {
        Arc::new(Self {
            message: message.to_string(),
            remaining: None,
            write: None,
        })
    }

    pub fn writing(key: CommonKey, value: &str) -> Arc<dyn StepHandler> {
        Arc::new(Self {
            message: "failed after writing".to_string(),
            remaining: None,
            write: Some((key, value.to_string())),
        })
    }

    pub fn times(n: usize) -> Arc<dyn StepHandler> {
        Arc::new(Self {
            message: "transient".to_string(),
            remaining: Some(AtomicUsize::new(n)),
            write: None,
        })
    }
}

#[async_trait]
impl StepHandler for FailingStep {
    async fn execute(&self, ctx: &mut StepContext) -> Result<(), FlowError> {
        if let Some((key, value)) = &self.write {
            ctx.set_common(*key, value.as_str());
        }
        if let Some(remaining) = &self.remaining {
            let left = remaining.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            remaining.store(left - 1, Ordering::SeqCst);
        }
        Err(FlowError::handler(self.message.as_str()))
    }
}

pub struct SlowStep {
    delay: Duration,
}

impl SlowStep {
    pub fn handler(delay: Duration) -> Arc<dyn StepHandler> {
        Arc::new(Self { delay })
    }
}

#[async_trait]
impl StepHandler for SlowStep {
    async fn execute(&self, _ctx: &mut StepContext) -> Result<(), FlowError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// executor harness over a "test" provider

pub struct EngineHarness {
    pub store: Arc<InMemoryTaskStore>,
    pub executor: TaskExecutor,
}

impl EngineHarness {
    pub fn with_counting(ids: &[&str]) -> Self {
        Self::with_handlers(ids.iter().map(|id| (*id, CountingStep::new().handler())).collect())
    }

    pub fn with_handlers(handlers: Vec<(&str, Arc<dyn StepHandler>)>) -> Self {
        let mut registry = StepRegistry::new("test");
        for (id, handler) in handlers {
            registry.register(id, handler).unwrap();
        }
        let mut registries = ProviderRegistries::new();
        registries.insert(Arc::new(registry)).unwrap();

        let store = Arc::new(InMemoryTaskStore::new());
        let accessor = Arc::new(TaskAccessor::new(store.clone(), Arc::new(fixed_clock())));
        let executor = TaskExecutor::new(accessor, Arc::new(registries), &ExecutorConfig::default());
        Self { store, executor }
    }

    pub async fn seed_task(&self, ids: &[&str]) -> TaskId {
        self.seed_task_with(ids, |_| {}).await
    }

    pub async fn seed_task_with(&self, ids: &[&str], mut tweak: impl FnMut(&mut Step)) -> TaskId {
        let mut task = task_with_steps(ids);
        for step in task.steps.values_mut() {
            tweak(step);
        }
        self.store.create(&task).await.unwrap();
        task.id
    }

    pub async fn load(&self, task_id: &TaskId) -> Task {
        self.store.get(task_id).await.unwrap().unwrap()
    }
}

// ---------------------------------------------------------------------------
// resource pool

struct Script {
    pending: VecDeque<String>,
    last: DeviceRecord,
}

#[derive(Default)]
struct PoolState {
    orders_issued: usize,
    returns_issued: usize,
    consume_calls: usize,
    failing_submissions: usize,
    scripts: HashMap<String, Script>,
    polls: HashMap<String, usize>,
    returned: Vec<String>,
}

/// A pool whose order records follow a script.
#[derive(Default)]
pub struct ScriptedPool {
    state: Mutex<PoolState>,
}

impl ScriptedPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// `pending` statuses in order, then FINISHED with `devices` devices.
    pub fn script_record(&self, order_id: &str, pending: &[&str], devices: Option<usize>) {
        let n = devices.unwrap_or(0);
        let last = DeviceRecord {
            order_id: order_id.to_string(),
            status: "FINISHED".to_string(),
            message: String::new(),
            device_ids: (1..=n).map(|i| format!("dev-{i}")).collect(),
            instance_ids: (1..=n).map(|i| format!("ins-{i}")).collect(),
            inner_ips: (1..=n).map(|i| format!("10.1.0.{i}")).collect(),
        };
        self.script(order_id, pending, last);
    }

    /// `pending` statuses in order, then FAILED with `message`.
    pub fn script_failure(&self, order_id: &str, pending: &[&str], message: &str) {
        let last = DeviceRecord {
            order_id: order_id.to_string(),
            status: "FAILED".to_string(),
            message: message.to_string(),
            ..Default::default()
        };
        self.script(order_id, pending, last);
    }

    /// `pending` statuses in order, then `last` verbatim.
    pub fn script(&self, order_id: &str, pending: &[&str], last: DeviceRecord) {
        let mut state = self.state.lock().unwrap();
        state.scripts.insert(
            order_id.to_string(),
            Script {
                pending: pending.iter().map(|s| s.to_string()).collect(),
                last,
            },
        );
    }

    pub fn fail_next_submissions(&self, n: usize) {
        self.state.lock().unwrap().failing_submissions = n;
    }

    pub fn consume_calls(&self) -> usize {
        self.state.lock().unwrap().consume_calls
    }

    pub fn poll_count(&self, order_id: &str) -> usize {
        self.state.lock().unwrap().polls.get(order_id).copied().unwrap_or(0)
    }

    pub fn returned_devices(&self) -> Vec<String> {
        self.state.lock().unwrap().returned.clone()
    }
}

#[async_trait]
impl ResourcePoolApi for ScriptedPool {
    async fn consume_device(&self, _request: &ConsumeDeviceRequest) -> Result<String, FlowError> {
        let mut state = self.state.lock().unwrap();
        state.consume_calls += 1;
        if state.failing_submissions > 0 {
            state.failing_submissions -= 1;
            return Err(FlowError::remote("consume_device", "503 service unavailable"));
        }
        state.orders_issued += 1;
        Ok(format!("order-{}", state.orders_issued))
    }

    async fn get_device_record(&self, order_id: &str) -> Result<DeviceRecord, FlowError> {
        let mut state = self.state.lock().unwrap();
        *state.polls.entry(order_id.to_string()).or_default() += 1;
        let script = state
            .scripts
            .get_mut(order_id)
            .ok_or_else(|| FlowError::remote("get_device_record", format!("unknown order {order_id}")))?;
        match script.pending.pop_front() {
            Some(status) => Ok(DeviceRecord {
                order_id: order_id.to_string(),
                status,
                ..Default::default()
            }),
            None => Ok(script.last.clone()),
        }
    }

    async fn return_device(&self, request: &ReturnDeviceRequest) -> Result<String, FlowError> {
        let mut state = self.state.lock().unwrap();
        state.returns_issued += 1;
        state.returned.extend(request.device_ids.iter().cloned());
        Ok(format!("return-{}", state.returns_issued))
    }
}

// ---------------------------------------------------------------------------
// cluster

/// Records successful calls as short lines, e.g. `"attach c-1 ng-1 cordoned=false 10.0.0.1"`.
#[derive(Default)]
pub struct RecordingOps {
    calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls whose line starts with `action` fail with a Remote error.
    pub fn fail_on(&self, action: &str) {
        self.failing.lock().unwrap().push(action.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, line: String) -> Result<(), FlowError> {
        let action = line.split(' ').next().unwrap_or_default().to_string();
        if self.failing.lock().unwrap().contains(&action) {
            return Err(FlowError::remote(action, "injected failure"));
        }
        self.calls.lock().unwrap().push(line);
        Ok(())
    }
}

#[async_trait]
impl ClusterOps for RecordingOps {
    async fn create_control_plane(&self, cluster_id: &str, masters: &[String]) -> Result<(), FlowError> {
        self.record(format!("create {cluster_id} {}", masters.join(",")))
    }

    async fn delete_control_plane(&self, cluster_id: &str) -> Result<(), FlowError> {
        self.record(format!("delete {cluster_id}"))
    }

    async fn set_schedulable(&self, cluster_id: &str, node_ips: &[String], cordon: bool) -> Result<(), FlowError> {
        let action = if cordon { "cordon" } else { "uncordon" };
        self.record(format!("{action} {cluster_id} {}", node_ips.join(",")))
    }

    async fn run_script(&self, cluster_id: &str, node_ips: &[String], script: &str) -> Result<(), FlowError> {
        self.record(format!("script {cluster_id} {} {script}", node_ips.join(",")))
    }

    async fn run_workflow(&self, cluster_id: &str, workflow_id: &str, node_ips: &[String]) -> Result<(), FlowError> {
        self.record(format!("workflow {cluster_id} {workflow_id} {}", node_ips.join(",")))
    }

    async fn attach_nodes(
        &self,
        cluster_id: &str,
        node_group_id: Option<&str>,
        node_ips: &[String],
        cordoned: bool,
    ) -> Result<(), FlowError> {
        self.record(format!(
            "attach {cluster_id} {} cordoned={cordoned} {}",
            node_group_id.unwrap_or("-"),
            node_ips.join(",")
        ))
    }

    async fn remove_nodes(&self, cluster_id: &str, node_ips: &[String]) -> Result<(), FlowError> {
        self.record(format!("remove {cluster_id} {}", node_ips.join(",")))
    }

    async fn verify_nodes(&self, cluster_id: &str, node_ips: &[String]) -> Result<(), FlowError> {
        self.record(format!("verify {cluster_id} {}", node_ips.join(",")))
    }

    async fn delete_node_group(&self, cluster_id: &str, node_group_id: &str) -> Result<(), FlowError> {
        self.record(format!("delete-group {cluster_id} {node_group_id}"))
    }
}

// ---------------------------------------------------------------------------
// full resource-pool wiring

fn linked(id: &str, cluster_id: &str, zones: &[&str], instance_type: &str) -> NodeGroup {
    NodeGroup {
        id: id.into(),
        cluster_id: cluster_id.into(),
        zones: zones.iter().map(|z| z.to_string()).collect(),
        pool: Some(PoolLinkage {
            pool_id: "pool-1".into(),
            system_id: "sys-1".into(),
        }),
        launch_template: Some(LaunchTemplate {
            region: "ap-guangzhou".into(),
            instance_type: instance_type.into(),
            image_id: "img-1".into(),
            ..Default::default()
        }),
    }
}

/// Node groups:
/// - `ng-1`: any-zone, `S5.MEDIUM4`, ample capacity
/// - `ng-zoned`: zones `ap-a`/`ap-b`, `S5.LARGE8`, no capacity unless set
/// - `ng-other`: belongs to cluster `c-2`
/// - `ng-unlinked`: no pool linkage
pub struct StepFixture {
    pub pool: Arc<ScriptedPool>,
    pub ops: Arc<RecordingOps>,
    pub node_groups: InMemoryNodeGroupStore,
    pub quota_source: StaticQuotaSource,
    pub deps: StepDeps,
    pub registry: Arc<StepRegistry>,
}

impl StepFixture {
    pub fn new() -> Self {
        let pool = Arc::new(ScriptedPool::new());
        let ops = Arc::new(RecordingOps::new());

        let node_groups = InMemoryNodeGroupStore::new();
        node_groups.insert(linked("ng-1", "c-1", &[], "S5.MEDIUM4"));
        node_groups.insert(linked("ng-zoned", "c-1", &["ap-a", "ap-b"], "S5.LARGE8"));
        node_groups.insert(linked("ng-other", "c-2", &[], "S5.MEDIUM4"));
        let mut unlinked = linked("ng-unlinked", "c-1", &[], "S5.MEDIUM4");
        unlinked.pool = None;
        node_groups.insert(unlinked);

        let quota_source = StaticQuotaSource::new();
        quota_source.set("ap-guangzhou", "S5.MEDIUM4", vec![capacity("ap-a", 100, 100, 0)]);

        let deps = StepDeps {
            pool: Arc::new(ResourcePoolClient::new(pool.clone(), &pool_config())),
            quota: Arc::new(QuotaAllocator::new(Arc::new(quota_source.clone()))),
            node_groups: Arc::new(node_groups.clone()),
            cluster: ops.clone(),
        };
        let registry = Arc::new(steps::resource_pool_registry(&deps).unwrap());

        Self {
            pool,
            ops,
            node_groups,
            quota_source,
            deps,
            registry,
        }
    }

    pub fn builder(&self) -> ResourcePoolTaskBuilder {
        self.builder_with(Arc::clone(&self.registry))
    }

    pub fn builder_with(&self, registry: Arc<StepRegistry>) -> ResourcePoolTaskBuilder {
        ResourcePoolTaskBuilder::new(
            registry,
            Arc::new(self.node_groups.clone()),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(fixed_clock()),
        )
    }

    pub fn engine(&self) -> TestEngine {
        let mut registries = ProviderRegistries::new();
        registries.insert(Arc::clone(&self.registry)).unwrap();

        let store = Arc::new(InMemoryTaskStore::new());
        let accessor = Arc::new(TaskAccessor::new(store.clone(), Arc::new(fixed_clock())));
        let executor = TaskExecutor::new(accessor, Arc::new(registries), &ExecutorConfig::default());
        TestEngine {
            store,
            executor: Arc::new(executor),
            builder: Arc::new(self.builder()),
        }
    }
}

pub struct TestEngine {
    pub store: Arc<InMemoryTaskStore>,
    pub executor: Arc<TaskExecutor>,
    pub builder: Arc<ResourcePoolTaskBuilder>,
}

impl TestEngine {
    pub async fn submit(&self, request: &OperationRequest) -> TaskId {
        let task = self.builder.build(request).await.unwrap();
        self.store.create(&task).await.unwrap();
        task.id
    }

    pub async fn seed_scale_up(&self, node_group_id: &str, count: i64) -> TaskId {
        self.submit(&request(
            Operation::ScaleUpNodeGroup {
                node_group_id: node_group_id.into(),
                count,
            },
            OperationOptions::default(),
        ))
        .await
    }

    pub async fn seed_scale_down(&self, node_group_id: &str, node_ips: &[&str], device_ids: &[&str]) -> TaskId {
        self.submit(&request(
            Operation::ScaleDownNodeGroup {
                node_group_id: node_group_id.into(),
                node_ips: node_ips.iter().map(|s| s.to_string()).collect(),
                device_ids: device_ids.iter().map(|s| s.to_string()).collect(),
            },
            OperationOptions::default(),
        ))
        .await
    }

    pub async fn run(&self, task_id: &TaskId, step: &str) -> Result<StepOutcome, FlowError> {
        self.executor.run_step(task_id, &StepId::from(step)).await
    }

    pub async fn load(&self, task_id: &TaskId) -> Task {
        self.store.get(task_id).await.unwrap().unwrap()
    }

    pub async fn update(&self, task_id: &TaskId, change: impl FnOnce(&mut Task)) {
        let mut task = self.load(task_id).await;
        change(&mut task);
        self.store.update(&task).await.unwrap();
    }
}
