//! Node groups are owned elsewhere; the core only reads them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub disk_type: String,
    pub size_gb: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSpec {
    pub key_pair_ids: Vec<String>,
    /// Only ever a reference to a secret, never the password itself.
    pub password_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchTemplate {
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

/// Link between a node group and the device pool it consumes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLinkage {
    pub pool_id: String,
    /// Consumer identity used when returning devices.
    pub system_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: String,
    pub cluster_id: String,
    /// Empty (or only blank entries) means "any zone".
    #[serde(default)]
    pub zones: Vec<String>,
    pub pool: Option<PoolLinkage>,
    pub launch_template: Option<LaunchTemplate>,
}

impl NodeGroup {
    /// Declared zones, trimmed, blanks and duplicates removed, order kept.
    pub fn declared_zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = Vec::new();
        for zone in self.zones.iter().map(|z| z.trim()).filter(|z| !z.is_empty()) {
            if !zones.iter().any(|z| z == zone) {
                zones.push(zone.to_string());
            }
        }
        zones
    }

    pub fn is_any_zone(&self) -> bool {
        self.declared_zones().is_empty()
    }

    /// `(region, instance_type)` when both are configured.
    pub fn capacity_key(&self) -> Option<(&str, &str)> {
        let template = self.launch_template.as_ref()?;
        let region = template.region.trim();
        let instance_type = template.instance_type.trim();
        if region.is_empty() || instance_type.is_empty() {
            return None;
        }
        Some((region, instance_type))
    }
}
