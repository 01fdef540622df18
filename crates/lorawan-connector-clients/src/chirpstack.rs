//! ChirpStack control plane over its REST API.
//!
//! Every request carries the configured API token as a bearer token.
//! Single-entity bodies are wrapped in an envelope named after the entity
//! (`{"tenant": {...}}`), listings come back as `{"totalCount", "result"}`.

use async_trait::async_trait;
use lorawan_connector_core::control_plane::{
    Application, ApplicationListItem, Device, DeviceActivation, DeviceKeys, DeviceListItem,
    DeviceProfile, HttpIntegration, Tenant, TenantListItem, TenantUser, User, UserListItem,
};
use lorawan_connector_core::{ConnectorResult, ControlPlane};
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::http::{decode, decode_field, expect_success, normalize_base, segment, transport_error};

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

pub struct ChirpstackClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl ChirpstackClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_token: impl Into<String>,
    ) -> ConnectorResult<Self> {
        Ok(Self {
            http,
            base_url: normalize_base(base_url)?,
            api_token: api_token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/api{path}", self.base_url))
            .bearer_auth(&self.api_token)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> ConnectorResult<reqwest::Response> {
        req.send().await.map_err(transport_error)
    }

    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> ConnectorResult<Vec<T>> {
        let resp = self.send(self.request(Method::GET, path).query(query)).await?;
        let page: ListResponse<T> = decode(resp, what).await?;
        Ok(page.result)
    }

    async fn create(&self, path: &str, body: serde_json::Value, what: &str) -> ConnectorResult<String> {
        let resp = self.send(self.request(Method::POST, path).json(&body)).await?;
        let created: CreateResponse = decode(resp, what).await?;
        Ok(created.id)
    }

    async fn post(&self, path: &str, body: serde_json::Value, what: &str) -> ConnectorResult<()> {
        let resp = self.send(self.request(Method::POST, path).json(&body)).await?;
        expect_success(resp, what).await
    }

    async fn put(&self, path: &str, body: serde_json::Value, what: &str) -> ConnectorResult<()> {
        let resp = self.send(self.request(Method::PUT, path).json(&body)).await?;
        expect_success(resp, what).await
    }

    async fn delete(&self, path: &str, what: &str) -> ConnectorResult<()> {
        let resp = self.send(self.request(Method::DELETE, path)).await?;
        expect_success(resp, what).await
    }

    async fn get_field<T: DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        what: &str,
    ) -> ConnectorResult<T> {
        let resp = self.send(self.request(Method::GET, path)).await?;
        decode_field(resp, field, what).await
    }
}

fn paging(limit: usize, offset: usize) -> Vec<(&'static str, String)> {
    vec![("limit", limit.to_string()), ("offset", offset.to_string())]
}

#[async_trait]
impl ControlPlane for ChirpstackClient {
    async fn list_tenants(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<TenantListItem>> {
        let mut query = paging(limit, offset);
        if let Some(search) = search {
            query.push(("search", search.to_string()));
        }
        self.list("/tenants", &query, "tenants").await
    }

    async fn create_tenant(&self, tenant: &Tenant) -> ConnectorResult<String> {
        let id = self
            .create("/tenants", json!({ "tenant": tenant }), "create tenant")
            .await?;
        debug!(tenant_id = %id, name = %tenant.name, "Created tenant");
        Ok(id)
    }

    async fn delete_tenant(&self, tenant_id: &str) -> ConnectorResult<()> {
        self.delete(
            &format!("/tenants/{}", segment(tenant_id)),
            &format!("tenant {tenant_id}"),
        )
        .await
    }

    async fn list_users(&self, limit: usize, offset: usize) -> ConnectorResult<Vec<UserListItem>> {
        self.list("/users", &paging(limit, offset), "users").await
    }

    async fn create_user(&self, user: &User) -> ConnectorResult<String> {
        self.create(
            "/users",
            json!({ "user": user, "password": "", "tenants": [] }),
            "create user",
        )
        .await
    }

    async fn delete_user(&self, user_id: &str) -> ConnectorResult<()> {
        self.delete(
            &format!("/users/{}", segment(user_id)),
            &format!("user {user_id}"),
        )
        .await
    }

    async fn get_tenant_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> ConnectorResult<TenantUser> {
        self.get_field(
            &format!("/tenants/{}/users/{}", segment(tenant_id), segment(user_id)),
            "tenantUser",
            &format!("tenant user {user_id} in {tenant_id}"),
        )
        .await
    }

    async fn add_tenant_user(&self, membership: &TenantUser) -> ConnectorResult<()> {
        self.post(
            &format!("/tenants/{}/users", segment(&membership.tenant_id)),
            json!({ "tenantUser": membership }),
            "add tenant user",
        )
        .await
    }

    async fn list_applications(
        &self,
        tenant_id: &str,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<ApplicationListItem>> {
        let mut query = paging(limit, offset);
        query.push(("tenantId", tenant_id.to_string()));
        if let Some(search) = search {
            query.push(("search", search.to_string()));
        }
        self.list("/applications", &query, "applications").await
    }

    async fn create_application(&self, application: &Application) -> ConnectorResult<String> {
        self.create(
            "/applications",
            json!({ "application": application }),
            "create application",
        )
        .await
    }

    async fn get_http_integration(&self, application_id: &str) -> ConnectorResult<HttpIntegration> {
        self.get_field(
            &format!("/applications/{}/integrations/http", segment(application_id)),
            "integration",
            &format!("http integration of {application_id}"),
        )
        .await
    }

    async fn create_http_integration(&self, integration: &HttpIntegration) -> ConnectorResult<()> {
        self.post(
            &format!(
                "/applications/{}/integrations/http",
                segment(&integration.application_id)
            ),
            json!({ "integration": integration }),
            "create http integration",
        )
        .await
    }

    async fn delete_http_integration(&self, application_id: &str) -> ConnectorResult<()> {
        self.delete(
            &format!("/applications/{}/integrations/http", segment(application_id)),
            &format!("http integration of {application_id}"),
        )
        .await
    }

    async fn list_devices(
        &self,
        application_id: &str,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<DeviceListItem>> {
        let mut query = paging(limit, offset);
        query.push(("applicationId", application_id.to_string()));
        self.list("/devices", &query, "devices").await
    }

    async fn get_device(&self, dev_eui: &str) -> ConnectorResult<Device> {
        self.get_field(
            &format!("/devices/{}", segment(dev_eui)),
            "device",
            &format!("device {dev_eui}"),
        )
        .await
    }

    async fn create_device(&self, device: &Device) -> ConnectorResult<()> {
        self.post("/devices", json!({ "device": device }), "create device")
            .await
    }

    async fn update_device(&self, device: &Device) -> ConnectorResult<()> {
        self.put(
            &format!("/devices/{}", segment(&device.dev_eui)),
            json!({ "device": device }),
            "update device",
        )
        .await
    }

    async fn delete_device(&self, dev_eui: &str) -> ConnectorResult<()> {
        self.delete(
            &format!("/devices/{}", segment(dev_eui)),
            &format!("device {dev_eui}"),
        )
        .await
    }

    async fn get_device_profile(&self, profile_id: &str) -> ConnectorResult<DeviceProfile> {
        self.get_field(
            &format!("/device-profiles/{}", segment(profile_id)),
            "deviceProfile",
            &format!("device profile {profile_id}"),
        )
        .await
    }

    async fn get_device_keys(&self, dev_eui: &str) -> ConnectorResult<DeviceKeys> {
        self.get_field(
            &format!("/devices/{}/keys", segment(dev_eui)),
            "deviceKeys",
            &format!("keys of {dev_eui}"),
        )
        .await
    }

    async fn create_device_keys(&self, keys: &DeviceKeys) -> ConnectorResult<()> {
        self.post(
            &format!("/devices/{}/keys", segment(&keys.dev_eui)),
            json!({ "deviceKeys": keys }),
            "create device keys",
        )
        .await
    }

    async fn update_device_keys(&self, keys: &DeviceKeys) -> ConnectorResult<()> {
        self.put(
            &format!("/devices/{}/keys", segment(&keys.dev_eui)),
            json!({ "deviceKeys": keys }),
            "update device keys",
        )
        .await
    }

    async fn get_device_activation(&self, dev_eui: &str) -> ConnectorResult<DeviceActivation> {
        self.get_field(
            &format!("/devices/{}/activation", segment(dev_eui)),
            "deviceActivation",
            &format!("activation of {dev_eui}"),
        )
        .await
    }

    async fn activate_device(&self, activation: &DeviceActivation) -> ConnectorResult<()> {
        self.post(
            &format!("/devices/{}/activate", segment(&activation.dev_eui)),
            json!({ "deviceActivation": activation }),
            "activate device",
        )
        .await
    }
}
