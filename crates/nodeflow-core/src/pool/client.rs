//! Resource pool client: apply / poll / return device orders.
//!
//! Submissions are retried with a fixed delay; polling runs at a fixed interval
//! until the order settles, a deadline passes, or the caller cancels.
//!
//! Callers are expected to persist the returned order ID before polling, so a
//! resumed step polls the existing order instead of submitting a new one.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::{PollPolicy, RetryPolicy};
use crate::config::PoolClientConfig;
use crate::domain::{
    ConsumeDeviceRequest, DeviceList, InstanceSpec, OrderStatus, ResourcePoolOrder,
    ReturnDeviceRequest, ZoneDesire,
};
use crate::error::FlowError;
use crate::ports::ResourcePoolApi;

pub struct ResourcePoolClient {
    api: Arc<dyn ResourcePoolApi>,
    submit: RetryPolicy,
    poll: PollPolicy,
}

impl ResourcePoolClient {
    pub fn new(api: Arc<dyn ResourcePoolApi>, config: &PoolClientConfig) -> Self {
        Self {
            api,
            submit: config.submit_policy(),
            poll: config.poll_policy(),
        }
    }

    /// Submit an apply order for `desired` instances shaped by `spec`.
    pub async fn apply_instances(
        &self,
        pool_id: &str,
        desired: u32,
        spec: &InstanceSpec,
    ) -> Result<ResourcePoolOrder, FlowError> {
        if desired == 0 {
            return Err(FlowError::validation("apply_instances: desired count is 0"));
        }
        let request = ConsumeDeviceRequest {
            pool_id: pool_id.to_string(),
            desired,
            desires: zone_desires(desired, spec),
        };

        let order_id = self
            .submit
            .run("consume_device", || self.api.consume_device(&request))
            .await
            .map_err(|(e, attempts)| {
                FlowError::remote(
                    "consume_device",
                    format!("pool={pool_id} attempts={attempts}: {e}"),
                )
            })?;

        info!(pool_id, order_id = %order_id, desired, "apply order submitted");
        Ok(ResourcePoolOrder::requested(order_id, desired, request.desires))
    }

    /// Poll `order_id` until it settles. Returns the produced devices.
    pub async fn check_order_status(
        &self,
        order_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeviceList, FlowError> {
        let mut order = ResourcePoolOrder::requested(order_id, 0, Vec::new());
        self.wait_order(&mut order, cancel).await
    }

    /// Poll until `order` leaves Requested, settling it exactly once.
    pub async fn wait_order(
        &self,
        order: &mut ResourcePoolOrder,
        cancel: &CancellationToken,
    ) -> Result<DeviceList, FlowError> {
        let started = Instant::now();
        let deadline = tokio::time::sleep_until(started + self.poll.deadline);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.poll.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let order_id = order.order_id.clone();
        let timeout = || FlowError::Timeout {
            what: format!("order {order_id}"),
            elapsed: started.elapsed(),
        };
        let cancelled = || FlowError::Cancelled(format!("polling order {order_id}"));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = &mut deadline => return Err(timeout()),
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = &mut deadline => return Err(timeout()),
                polled = self.api.get_device_record(&order_id) => polled,
            };

            let record = match polled {
                Ok(record) => record,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "get_device_record failed, still polling");
                    continue;
                }
            };

            match OrderStatus::parse(&record.status) {
                Some(OrderStatus::Finished) => {
                    let devices = DeviceList {
                        device_ids: record.device_ids,
                        instance_ids: record.instance_ids,
                        node_ips: record.inner_ips,
                    };
                    order.finish(devices.clone())?;
                    info!(order_id = %order_id, devices = devices.len(), "order finished");
                    return Ok(devices);
                }
                Some(OrderStatus::Failed) => {
                    let reason = if record.message.is_empty() {
                        "order failed without a reason".to_string()
                    } else {
                        record.message
                    };
                    order.fail(reason.clone())?;
                    return Err(FlowError::remote(format!("order {order_id}"), reason));
                }
                Some(OrderStatus::Requested) => {
                    debug!(order_id = %order_id, "order still requested");
                }
                None => {
                    warn!(order_id = %order_id, status = %record.status, "unrecognized order status, treating as pending");
                }
            }
        }
    }

    /// Submit a return order for `device_ids`.
    pub async fn destroy_instances(
        &self,
        pool_id: &str,
        system_id: &str,
        device_ids: &[String],
        operator: &str,
    ) -> Result<String, FlowError> {
        if device_ids.is_empty() {
            return Err(FlowError::validation("destroy_instances: no device IDs"));
        }
        let request = ReturnDeviceRequest {
            pool_id: pool_id.to_string(),
            system_id: system_id.to_string(),
            device_ids: device_ids.to_vec(),
            operator: operator.to_string(),
        };

        let order_id = self
            .submit
            .run("return_device", || self.api.return_device(&request))
            .await
            .map_err(|(e, attempts)| {
                FlowError::remote(
                    "return_device",
                    format!("pool={pool_id} attempts={attempts}: {e}"),
                )
            })?;

        info!(pool_id, order_id = %order_id, devices = device_ids.len(), "return order submitted");
        Ok(order_id)
    }
}

/// One desire per zone of the split, or a single zone-less desire.
fn zone_desires(desired: u32, spec: &InstanceSpec) -> Vec<ZoneDesire> {
    let desire = |zone: &str, count: u32| ZoneDesire {
        zone: zone.to_string(),
        count,
        region: spec.region.clone(),
        instance_type: spec.instance_type.clone(),
        cpu: spec.cpu,
        memory_gb: spec.memory_gb,
        system_disk: spec.system_disk.clone(),
        data_disks: spec.data_disks.clone(),
        image_id: spec.image_id.clone(),
        security_group_ids: spec.security_group_ids.clone(),
        login: spec.login.clone(),
        vpc_id: spec.vpc_id.clone(),
        subnet_ids: spec.subnet_ids.clone(),
    };

    let split: Vec<ZoneDesire> = spec
        .zone_split
        .iter()
        .filter(|a| a.count > 0)
        .map(|a| desire(&a.zone, a.count))
        .collect();
    if split.is_empty() {
        vec![desire("", desired)]
    } else {
        split
    }
}
