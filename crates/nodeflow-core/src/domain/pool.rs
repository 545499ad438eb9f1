//! Resource pool model: capacity snapshots, orders and the devices they yield.

use serde::{Deserialize, Serialize};

use super::node_group::{DiskSpec, LaunchTemplate, LoginSpec};
use crate::error::FlowError;

/// Capacity of one zone for one `(region, instance_type)`.
///
/// `group_quota` / `group_used` are attributed to the node group the snapshot
/// was queried for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneCapacity {
    pub zone: String,
    pub oversold_total: u64,
    pub oversold_available: u64,
    pub group_quota: u64,
    pub group_used: u64,
}

/// Predicted share of a scale-up for one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneAllocation {
    pub zone: String,
    pub count: u32,
}

/// Shape of the instances to request, derived from a node group's launch template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub region: String,
    pub zones: Vec<String>,
    pub instance_type: String,
    pub cpu: u32,
    pub memory_gb: u32,
    pub system_disk: DiskSpec,
    pub data_disks: Vec<DiskSpec>,
    pub image_id: String,
    pub security_group_ids: Vec<String>,
    pub login: LoginSpec,
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
    /// Per-zone split; empty means "let the pool place everything".
    pub zone_split: Vec<ZoneAllocation>,
}

impl InstanceSpec {
    pub fn from_template(template: &LaunchTemplate, zones: Vec<String>) -> Self {
        Self {
            region: template.region.clone(),
            zones,
            instance_type: template.instance_type.clone(),
            cpu: template.cpu,
            memory_gb: template.memory_gb,
            system_disk: template.system_disk.clone(),
            data_disks: template.data_disks.clone(),
            image_id: template.image_id.clone(),
            security_group_ids: template.security_group_ids.clone(),
            login: template.login.clone(),
            vpc_id: template.vpc_id.clone(),
            subnet_ids: template.subnet_ids.clone(),
            zone_split: Vec::new(),
        }
    }

    pub fn with_zone_split(mut self, split: Vec<ZoneAllocation>) -> Self {
        self.zone_split = split;
        self
    }
}

/// What to build in one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDesire {
    /// Empty zone lets the pool choose.
    pub zone: String,
    pub count: u32,
    pub region: String,
    pub instance_type: String,
    pub cpu: u32,
    pub memory_gb: u32,
    pub system_disk: DiskSpec,
    pub data_disks: Vec<DiskSpec>,
    pub image_id: String,
    pub security_group_ids: Vec<String>,
    pub login: LoginSpec,
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeDeviceRequest {
    pub pool_id: String,
    pub desired: u32,
    pub desires: Vec<ZoneDesire>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDeviceRequest {
    pub pool_id: String,
    pub system_id: String,
    pub device_ids: Vec<String>,
    pub operator: String,
}

/// Raw order record as reported by the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRecord {
    pub order_id: String,
    pub status: String,
    pub message: String,
    pub device_ids: Vec<String>,
    pub instance_ids: Vec<String>,
    pub inner_ips: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Requested,
    Finished,
    Failed,
}

impl OrderStatus {
    /// Maps the pool's status strings. `None` for anything unrecognized.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "REQUESTED" | "RUNNING" | "PENDING" => Some(OrderStatus::Requested),
            "FINISHED" | "SUCCESS" => Some(OrderStatus::Finished),
            "FAILED" | "FAILURE" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

/// Devices produced by a finished order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList {
    pub device_ids: Vec<String>,
    pub instance_ids: Vec<String>,
    pub node_ips: Vec<String>,
}

impl DeviceList {
    pub fn len(&self) -> usize {
        self.device_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.device_ids.is_empty()
    }

    /// Why the list cannot be used for joining nodes, if it can't: no
    /// devices, or instance / IP lists that do not line up with the devices.
    pub fn defect(&self) -> Option<String> {
        let n = self.device_ids.len();
        if n == 0 {
            return Some("finished without devices".to_string());
        }
        if self.instance_ids.len() != n || self.node_ips.len() != n {
            return Some(format!(
                "finished with {n} devices but {} instance IDs and {} node IPs",
                self.instance_ids.len(),
                self.node_ips.len()
            ));
        }
        None
    }
}

/// An apply order and its lifecycle: Requested -> Finished | Failed, once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePoolOrder {
    pub order_id: String,
    pub quantity: u32,
    pub desires: Vec<ZoneDesire>,
    pub status: OrderStatus,
    pub devices: Option<DeviceList>,
    pub failure: Option<String>,
}

impl ResourcePoolOrder {
    pub fn requested(order_id: impl Into<String>, quantity: u32, desires: Vec<ZoneDesire>) -> Self {
        Self {
            order_id: order_id.into(),
            quantity,
            desires,
            status: OrderStatus::Requested,
            devices: None,
            failure: None,
        }
    }

    pub fn finish(&mut self, devices: DeviceList) -> Result<(), FlowError> {
        self.ensure_requested()?;
        if let Some(defect) = devices.defect() {
            return Err(FlowError::remote(format!("order {}", self.order_id), defect));
        }
        self.status = OrderStatus::Finished;
        self.devices = Some(devices);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), FlowError> {
        self.ensure_requested()?;
        self.status = OrderStatus::Failed;
        self.failure = Some(reason.into());
        Ok(())
    }

    fn ensure_requested(&self) -> Result<(), FlowError> {
        if self.status != OrderStatus::Requested {
            return Err(FlowError::handler(format!(
                "order {} already settled as {:?}",
                self.order_id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn devices(n: usize) -> DeviceList {
        DeviceList {
            device_ids: (0..n).map(|i| format!("dev-{i}")).collect(),
            instance_ids: (0..n).map(|i| format!("ins-{i}")).collect(),
            node_ips: (0..n).map(|i| format!("10.0.0.{i}")).collect(),
        }
    }

    #[rstest]
    #[case::requested("REQUESTED", Some(OrderStatus::Requested))]
    #[case::running_lowercase("running", Some(OrderStatus::Requested))]
    #[case::finished("FINISHED", Some(OrderStatus::Finished))]
    #[case::failed("FAILED", Some(OrderStatus::Failed))]
    #[case::unknown("PAUSED", None)]
    fn order_status_parsing(#[case] raw: &str, #[case] expected: Option<OrderStatus>) {
        assert_eq!(OrderStatus::parse(raw), expected);
    }

    #[test]
    fn order_settles_exactly_once() {
        let mut order = ResourcePoolOrder::requested("o-1", 2, vec![]);
        order.finish(devices(2)).unwrap();
        assert_eq!(order.status, OrderStatus::Finished);
        assert!(order.fail("late").is_err());
        assert_eq!(order.devices.as_ref().map(DeviceList::len), Some(2));
    }

    #[test]
    fn finished_order_requires_devices() {
        let mut order = ResourcePoolOrder::requested("o-1", 2, vec![]);
        assert!(order.finish(devices(0)).is_err());
        assert_eq!(order.status, OrderStatus::Requested);
    }

    #[rstest]
    #[case::no_instances(2, 0, 2)]
    #[case::no_ips(2, 2, 0)]
    #[case::fewer_ips(2, 2, 1)]
    fn finished_order_requires_matching_lists(#[case] devs: usize, #[case] instances: usize, #[case] ips: usize) {
        let mut list = devices(devs);
        list.instance_ids.truncate(instances);
        list.node_ips.truncate(ips);

        let mut order = ResourcePoolOrder::requested("o-1", 2, vec![]);
        let err = order.finish(list).unwrap_err();
        assert!(matches!(err, FlowError::Remote { .. }));
        assert_eq!(order.status, OrderStatus::Requested);
    }

    #[test]
    fn failed_order_has_no_devices() {
        let mut order = ResourcePoolOrder::requested("o-1", 1, vec![]);
        order.fail("no stock").unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert!(order.devices.is_none());
    }
}
