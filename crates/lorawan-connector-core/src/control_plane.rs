//! Network-server control-plane model and access trait.
//!
//! Field names follow the control plane's JSON representation (camelCase),
//! so the HTTP client can send these structs as-is.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorResult;

/// Reserved name of the per-tenant integration application.
pub const APPLICATION_NAME: &str = "platform-integration";

/// Tag placed on every tenant the connector creates.
pub const MANAGED_BY_TAG: &str = "Managed-By";

pub const MANAGED_DESCRIPTION: &str = "Managed by lorawan-platform-connector";

/// Placeholder for keys the registry does not provide.
pub const ZERO_KEY: &str = "00000000000000000000000000000000";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub description: String,
    pub can_have_gateways: bool,
    pub private_gateways_up: bool,
    pub private_gateways_down: bool,
    pub max_gateway_count: u32,
    pub max_device_count: u32,
    pub tags: HashMap<String, String>,
}

impl Tenant {
    /// A connector-owned tenant for the given identity email.
    pub fn managed(email: &str) -> Self {
        Self {
            name: email.to_string(),
            description: MANAGED_DESCRIPTION.to_string(),
            can_have_gateways: true,
            private_gateways_up: true,
            private_gateways_down: true,
            tags: HashMap::from([(
                MANAGED_BY_TAG.to_string(),
                crate::model::MANAGED_BY_VALUE.to_string(),
            )]),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantListItem {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub note: String,
}

impl User {
    pub fn managed(email: &str) -> Self {
        Self {
            email: email.to_string(),
            is_active: true,
            note: MANAGED_DESCRIPTION.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserListItem {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantUser {
    pub tenant_id: String,
    pub user_id: String,
    pub email: String,
    pub is_admin: bool,
    pub is_device_admin: bool,
    pub is_gateway_admin: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Application {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationListItem {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    #[default]
    Json,
    Protobuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpIntegration {
    pub application_id: String,
    pub headers: HashMap<String, String>,
    pub encoding: Encoding,
    pub event_endpoint_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    pub dev_eui: String,
    pub name: String,
    pub description: String,
    pub application_id: String,
    pub device_profile_id: String,
    pub join_eui: String,
    pub skip_fcnt_check: bool,
    pub is_disabled: bool,
    pub tags: HashMap<String, String>,
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceListItem {
    pub dev_eui: String,
    pub name: String,
    pub description: String,
    pub device_profile_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceKeys {
    pub dev_eui: String,
    pub nwk_key: String,
    pub app_key: String,
    pub gen_app_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceActivation {
    pub dev_eui: String,
    pub dev_addr: String,
    pub app_s_key: String,
    pub nwk_s_enc_key: String,
    pub s_nwk_s_int_key: String,
    pub f_nwk_s_int_key: String,
    pub f_cnt_up: u32,
    pub n_f_cnt_down: u32,
    pub a_f_cnt_down: u32,
}

impl DeviceActivation {
    /// Structural comparison; frame counters are only considered when
    /// `compare_frame_counters` is set.
    pub fn matches(&self, other: &DeviceActivation, compare_frame_counters: bool) -> bool {
        let session_equal = self.dev_eui == other.dev_eui
            && self.dev_addr == other.dev_addr
            && self.app_s_key == other.app_s_key
            && self.nwk_s_enc_key == other.nwk_s_enc_key
            && self.s_nwk_s_int_key == other.s_nwk_s_int_key
            && self.f_nwk_s_int_key == other.f_nwk_s_int_key;
        if !compare_frame_counters {
            return session_equal;
        }
        session_equal
            && self.f_cnt_up == other.f_cnt_up
            && self.n_f_cnt_down == other.n_f_cnt_down
            && self.a_f_cnt_down == other.a_f_cnt_down
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceProfile {
    pub id: String,
    pub name: String,
    pub supports_otaa: bool,
}

/// Write access to the network-server control plane.
///
/// Single-entity getters return `ConnectorError::NotFound` for absent
/// entities; listings take `limit`/`offset` and return one page.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_tenants(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<TenantListItem>>;
    async fn create_tenant(&self, tenant: &Tenant) -> ConnectorResult<String>;
    async fn delete_tenant(&self, tenant_id: &str) -> ConnectorResult<()>;

    async fn list_users(&self, limit: usize, offset: usize) -> ConnectorResult<Vec<UserListItem>>;
    async fn create_user(&self, user: &User) -> ConnectorResult<String>;
    async fn delete_user(&self, user_id: &str) -> ConnectorResult<()>;

    async fn get_tenant_user(&self, tenant_id: &str, user_id: &str)
    -> ConnectorResult<TenantUser>;
    async fn add_tenant_user(&self, membership: &TenantUser) -> ConnectorResult<()>;

    async fn list_applications(
        &self,
        tenant_id: &str,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<ApplicationListItem>>;
    async fn create_application(&self, application: &Application) -> ConnectorResult<String>;

    async fn get_http_integration(&self, application_id: &str) -> ConnectorResult<HttpIntegration>;
    async fn create_http_integration(&self, integration: &HttpIntegration) -> ConnectorResult<()>;
    async fn delete_http_integration(&self, application_id: &str) -> ConnectorResult<()>;

    async fn list_devices(
        &self,
        application_id: &str,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<DeviceListItem>>;
    async fn get_device(&self, dev_eui: &str) -> ConnectorResult<Device>;
    async fn create_device(&self, device: &Device) -> ConnectorResult<()>;
    async fn update_device(&self, device: &Device) -> ConnectorResult<()>;
    async fn delete_device(&self, dev_eui: &str) -> ConnectorResult<()>;

    async fn get_device_profile(&self, profile_id: &str) -> ConnectorResult<DeviceProfile>;

    async fn get_device_keys(&self, dev_eui: &str) -> ConnectorResult<DeviceKeys>;
    async fn create_device_keys(&self, keys: &DeviceKeys) -> ConnectorResult<()>;
    async fn update_device_keys(&self, keys: &DeviceKeys) -> ConnectorResult<()>;

    /// Current activation; `NotFound` when the device was never activated.
    async fn get_device_activation(&self, dev_eui: &str) -> ConnectorResult<DeviceActivation>;
    async fn activate_device(&self, activation: &DeviceActivation) -> ConnectorResult<()>;
}
