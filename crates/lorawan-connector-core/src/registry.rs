use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::model::{AttributeFilter, DeviceType, ManagedDevice};

/// Read access to the upstream device registry.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list_device_types(
        &self,
        filter: &AttributeFilter,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<DeviceType>>;

    /// Devices of one type, each with its device type expanded.
    async fn list_devices_of_type(
        &self,
        device_type_id: &str,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<ManagedDevice>>;

    /// A single device with its device type expanded.
    async fn get_device(&self, id: &str) -> ConnectorResult<ManagedDevice>;

    /// Devices of `owner_id` whose local id is one of `local_ids`.
    async fn list_devices_by_local_ids(
        &self,
        owner_id: &str,
        local_ids: &[String],
    ) -> ConnectorResult<Vec<ManagedDevice>>;
}
