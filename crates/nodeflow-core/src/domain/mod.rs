//! Domain model (IDs, tasks, steps, operations, node groups, pool orders).

pub mod ids;
pub mod node_group;
pub mod operation;
pub mod params;
pub mod pool;
pub mod task;

pub use ids::{StepId, TaskId};
pub use node_group::{DiskSpec, LaunchTemplate, LoginSpec, NodeGroup, PoolLinkage};
pub use operation::{Operation, OperationOptions, OperationRequest, OperationType};
pub use params::{CommonKey, CommonParams};
pub use pool::{
    ConsumeDeviceRequest, DeviceList, DeviceRecord, InstanceSpec, OrderStatus,
    ResourcePoolOrder, ReturnDeviceRequest, ZoneAllocation, ZoneCapacity, ZoneDesire,
};
pub use task::{Step, StepStatus, Task, TaskStatus, TaskTarget};
