//! Fixed node groups and capacity snapshots, for development wiring.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::{NodeGroup, ZoneCapacity};
use crate::error::FlowError;
use crate::ports::{NodeGroupStore, QuotaSource};

#[derive(Default, Clone)]
pub struct InMemoryNodeGroupStore {
    groups: Arc<RwLock<HashMap<String, NodeGroup>>>,
}

impl InMemoryNodeGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, group: NodeGroup) {
        let mut groups = self.groups.write().unwrap_or_else(|e| e.into_inner());
        groups.insert(group.id.clone(), group);
    }
}

#[async_trait]
impl NodeGroupStore for InMemoryNodeGroupStore {
    async fn get_node_group(&self, node_group_id: &str) -> Result<Option<NodeGroup>, FlowError> {
        let groups = self.groups.read().unwrap_or_else(|e| e.into_inner());
        Ok(groups.get(node_group_id).cloned())
    }
}

/// Snapshot keyed by `(region, instance_type)`. The same zone records are
/// reported regardless of the node group asked about.
#[derive(Default, Clone)]
pub struct StaticQuotaSource {
    zones: Arc<RwLock<HashMap<(String, String), Vec<ZoneCapacity>>>>,
}

impl StaticQuotaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, region: &str, instance_type: &str, zones: Vec<ZoneCapacity>) {
        let mut map = self.zones.write().unwrap_or_else(|e| e.into_inner());
        map.insert((region.to_string(), instance_type.to_string()), zones);
    }
}

#[async_trait]
impl QuotaSource for StaticQuotaSource {
    async fn zone_capacity(
        &self,
        region: &str,
        instance_type: &str,
        _node_group_id: &str,
    ) -> Result<Vec<ZoneCapacity>, FlowError> {
        let map = self.zones.read().unwrap_or_else(|e| e.into_inner());
        Ok(map
            .get(&(region.to_string(), instance_type.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
