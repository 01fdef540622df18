//! Device registry client for the platform device repository.

use async_trait::async_trait;
use lorawan_connector_core::{
    AttributeFilter, ConnectorResult, DeviceRegistry, DeviceType, ManagedDevice,
};
use tracing::debug;

use crate::credential::CredentialCell;
use crate::http::{decode, normalize_base, segment, transport_error};

pub struct DeviceRepoClient {
    http: reqwest::Client,
    base_url: String,
    credentials: CredentialCell,
}

impl DeviceRepoClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        credentials: CredentialCell,
    ) -> ConnectorResult<Self> {
        Ok(Self {
            http,
            base_url: normalize_base(base_url)?,
            credentials,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(self.credentials.bearer())
    }
}

#[async_trait]
impl DeviceRegistry for DeviceRepoClient {
    async fn list_device_types(
        &self,
        filter: &AttributeFilter,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<DeviceType>> {
        let resp = self
            .get("/v3/device-types")
            .query(&[
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
                ("attr-keys", filter.key.clone()),
                ("attr-values", filter.value.clone()),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let types: Vec<DeviceType> = decode(resp, "device types").await?;
        debug!(offset, count = types.len(), "Listed device types");
        Ok(types)
    }

    async fn list_devices_of_type(
        &self,
        device_type_id: &str,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<ManagedDevice>> {
        let resp = self
            .get("/v3/extended-devices")
            .query(&[
                ("device-type-ids", device_type_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
                ("full-dt", "true".to_string()),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp, &format!("devices of type {device_type_id}")).await
    }

    async fn get_device(&self, id: &str) -> ConnectorResult<ManagedDevice> {
        let resp = self
            .get(&format!("/v3/extended-devices/{}", segment(id)))
            .query(&[("full-dt", "true")])
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp, &format!("device {id}")).await
    }

    async fn list_devices_by_local_ids(
        &self,
        owner_id: &str,
        local_ids: &[String],
    ) -> ConnectorResult<Vec<ManagedDevice>> {
        if local_ids.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .get("/v3/extended-devices")
            .query(&[
                ("local-ids", local_ids.join(",")),
                ("owner", owner_id.to_string()),
                ("limit", local_ids.len().to_string()),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp, "devices by local id").await
    }
}
