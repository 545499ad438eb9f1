use async_trait::async_trait;

use crate::domain::NodeGroup;
use crate::error::FlowError;

/// Read access to node groups owned by another service.
#[async_trait]
pub trait NodeGroupStore: Send + Sync {
    async fn get_node_group(&self, node_group_id: &str) -> Result<Option<NodeGroup>, FlowError>;
}
