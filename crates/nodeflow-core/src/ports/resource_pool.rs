//! ResourcePoolApi port - リモートのデバイスプール
//!
//! transport（HTTP/gRPC）は実装側が決める。ここでは request/response の形だけ。

use async_trait::async_trait;

use crate::domain::{ConsumeDeviceRequest, DeviceRecord, ReturnDeviceRequest};
use crate::error::FlowError;

#[async_trait]
pub trait ResourcePoolApi: Send + Sync {
    /// Submit a consume (apply) order. Returns the order ID.
    async fn consume_device(&self, request: &ConsumeDeviceRequest) -> Result<String, FlowError>;

    async fn get_device_record(&self, order_id: &str) -> Result<DeviceRecord, FlowError>;

    /// Submit a return order. Returns the order ID.
    async fn return_device(&self, request: &ReturnDeviceRequest) -> Result<String, FlowError>;
}
