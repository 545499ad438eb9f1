//! QuotaSource port - read-only capacity snapshots.

use async_trait::async_trait;

use crate::domain::ZoneCapacity;
use crate::error::FlowError;

#[async_trait]
pub trait QuotaSource: Send + Sync {
    /// Zone records for `(region, instance_type)`, with group counters
    /// attributed to `node_group_id`.
    async fn zone_capacity(
        &self,
        region: &str,
        instance_type: &str,
        node_group_id: &str,
    ) -> Result<Vec<ZoneCapacity>, FlowError>;
}
