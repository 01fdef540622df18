//! In-memory collaborators for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lorawan_connector_core::control_plane::{
    Application, ApplicationListItem, Device, DeviceActivation, DeviceKeys, DeviceListItem,
    DeviceProfile, HttpIntegration, Tenant, TenantListItem, TenantUser, User, UserListItem,
};
use lorawan_connector_core::model::{
    Attribute, DEVICE_PROFILE_ID_KEY, MANAGED_BY_KEY, MANAGED_BY_VALUE,
};
use lorawan_connector_core::{
    AttributeFilter, ConnectorError, ConnectorResult, ControlPlane, DeviceRegistry, DeviceType,
    Identity, IdentityProvider, ManagedDevice,
};
use lorawan_connector_server::{Controller, ReconcileSettings};

pub const EVENT_ENDPOINT: &str = "http://connector:8080/event";

pub fn identity(id: &str, email: &str) -> Identity {
    Identity {
        id: id.to_string(),
        username: None,
        email: Some(email.to_string()),
        display_name: None,
    }
}

pub fn managed_type(id: &str, profile_id: &str) -> DeviceType {
    DeviceType {
        id: id.to_string(),
        name: format!("type {id}"),
        attributes: vec![
            Attribute::new(MANAGED_BY_KEY, MANAGED_BY_VALUE),
            Attribute::new(DEVICE_PROFILE_ID_KEY, profile_id),
        ],
    }
}

pub fn unmanaged_type(id: &str) -> DeviceType {
    DeviceType {
        id: id.to_string(),
        name: format!("type {id}"),
        attributes: vec![],
    }
}

pub fn device(id: &str, eui: &str, name: &str, owner_id: &str, device_type_id: &str) -> ManagedDevice {
    ManagedDevice {
        id: id.to_string(),
        local_id: eui.to_string(),
        name: name.to_string(),
        display_name: None,
        owner_id: owner_id.to_string(),
        device_type_id: device_type_id.to_string(),
        attributes: vec![],
        device_type: None,
    }
}

pub fn settings() -> ReconcileSettings {
    ReconcileSettings {
        event_endpoint: EVENT_ENDPOINT.to_string(),
        ..Default::default()
    }
}

/// Controller over fresh fakes.
pub struct Harness {
    pub identities: Arc<FakeIdentityProvider>,
    pub registry: Arc<FakeRegistry>,
    pub control_plane: Arc<FakeControlPlane>,
    pub controller: Arc<Controller>,
}

impl Harness {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self::with_settings(identities, settings())
    }

    pub fn with_settings(identities: Vec<Identity>, settings: ReconcileSettings) -> Self {
        let identities = FakeIdentityProvider::new(identities);
        let registry = FakeRegistry::new();
        let control_plane = FakeControlPlane::new();
        let controller = Arc::new(Controller::new(
            identities.clone(),
            registry.clone(),
            control_plane.clone(),
            settings,
        ));
        Self {
            identities,
            registry,
            control_plane,
            controller,
        }
    }
}

#[derive(Default)]
pub struct FakeIdentityProvider {
    identities: Mutex<Vec<Identity>>,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
}

impl FakeIdentityProvider {
    pub fn new(identities: Vec<Identity>) -> Arc<Self> {
        Arc::new(Self {
            identities: Mutex::new(identities),
            ..Default::default()
        })
    }

    pub fn set(&self, identities: Vec<Identity>) {
        *self.identities.lock().unwrap() = identities;
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn list_identities(&self, first: usize, max: usize) -> ConnectorResult<Vec<Identity>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let all = self.identities.lock().unwrap();
        Ok(all.iter().skip(first).take(max).cloned().collect())
    }

    async fn get_identity(&self, id: &str) -> ConnectorResult<Identity> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.identities
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| ConnectorError::not_found(format!("identity {id}")))
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    types: Mutex<Vec<DeviceType>>,
    devices: Mutex<Vec<ManagedDevice>>,
    pub type_page_calls: AtomicUsize,
    pub device_page_calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_type(&self, device_type: DeviceType) {
        self.types.lock().unwrap().push(device_type);
    }

    pub fn add_device(&self, device: ManagedDevice) {
        self.devices.lock().unwrap().push(device);
    }

    pub fn remove_device(&self, id: &str) {
        self.devices.lock().unwrap().retain(|d| d.id != id);
    }

    pub fn rename_device(&self, id: &str, name: &str) {
        for d in self.devices.lock().unwrap().iter_mut().filter(|d| d.id == id) {
            d.name = name.to_string();
        }
    }

    fn expand(&self, mut device: ManagedDevice) -> ManagedDevice {
        device.device_type = self
            .types
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == device.device_type_id)
            .cloned();
        device
    }

    pub fn expanded(&self, id: &str) -> Option<ManagedDevice> {
        let device = self.devices.lock().unwrap().iter().find(|d| d.id == id).cloned();
        device.map(|d| self.expand(d))
    }
}

#[async_trait]
impl DeviceRegistry for FakeRegistry {
    async fn list_device_types(
        &self,
        filter: &AttributeFilter,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<DeviceType>> {
        self.type_page_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .types
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                t.attributes
                    .iter()
                    .any(|a| a.key == filter.key && a.value == filter.value)
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_devices_of_type(
        &self,
        device_type_id: &str,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<ManagedDevice>> {
        self.device_page_calls.fetch_add(1, Ordering::SeqCst);
        let page: Vec<ManagedDevice> = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.device_type_id == device_type_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(page.into_iter().map(|d| self.expand(d)).collect())
    }

    async fn get_device(&self, id: &str) -> ConnectorResult<ManagedDevice> {
        self.expanded(id)
            .ok_or_else(|| ConnectorError::not_found(format!("device {id}")))
    }

    async fn list_devices_by_local_ids(
        &self,
        owner_id: &str,
        local_ids: &[String],
    ) -> ConnectorResult<Vec<ManagedDevice>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| {
                d.owner_id == owner_id
                    && local_ids.iter().any(|l| l.eq_ignore_ascii_case(&d.local_id))
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ControlPlaneState {
    tenants: Vec<TenantListItem>,
    users: Vec<UserListItem>,
    memberships: HashSet<(String, String)>,
    applications: Vec<(String, ApplicationListItem)>,
    integrations: HashMap<String, HttpIntegration>,
    devices: Vec<(String, Device)>,
    keys: HashMap<String, DeviceKeys>,
    activations: HashMap<String, DeviceActivation>,
    profiles: HashMap<String, DeviceProfile>,
    calls: Vec<String>,
    failures: HashSet<String>,
    next_id: usize,
}

impl ControlPlaneState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Log a mutation unless it was set up to fail.
    fn record(&mut self, call: String) -> ConnectorResult<()> {
        if self.failures.contains(&call) {
            return Err(ConnectorError::Remote {
                status: 500,
                message: format!("injected failure for {call}"),
            });
        }
        self.calls.push(call);
        Ok(())
    }
}

/// EUIs are stored and echoed in lowercase, whatever case they arrive in.
fn normalize_eui(dev_eui: &str) -> String {
    dev_eui.to_ascii_lowercase()
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    items.skip(offset).take(limit).collect()
}

/// Control plane keeping its entities in memory and logging every
/// mutating call.
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<ControlPlaneState>,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        let cp = Self::default();
        cp.add_profile("p-otaa", true);
        cp.add_profile("p-abp", false);
        Arc::new(cp)
    }

    pub fn add_profile(&self, id: &str, supports_otaa: bool) {
        self.state.lock().unwrap().profiles.insert(
            id.to_string(),
            DeviceProfile {
                id: id.to_string(),
                name: id.to_string(),
                supports_otaa,
            },
        );
    }

    pub fn add_tenant(&self, name: &str) -> String {
        let mut st = self.state.lock().unwrap();
        let id = st.id("tenant");
        st.tenants.push(TenantListItem {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    pub fn add_user(&self, email: &str) -> String {
        let mut st = self.state.lock().unwrap();
        let id = st.id("user");
        st.users.push(UserListItem {
            id: id.clone(),
            email: email.to_string(),
            is_admin: false,
            is_active: true,
        });
        id
    }

    pub fn add_application(&self, tenant_id: &str, name: &str) -> String {
        let mut st = self.state.lock().unwrap();
        let id = st.id("app");
        st.applications.push((
            tenant_id.to_string(),
            ApplicationListItem {
                id: id.clone(),
                name: name.to_string(),
                description: String::new(),
            },
        ));
        id
    }

    pub fn add_integration(&self, integration: HttpIntegration) {
        self.state
            .lock()
            .unwrap()
            .integrations
            .insert(integration.application_id.clone(), integration);
    }

    pub fn add_device(&self, mut device: Device) {
        device.dev_eui = normalize_eui(&device.dev_eui);
        self.state
            .lock()
            .unwrap()
            .devices
            .push((device.dev_eui.clone(), device));
    }

    pub fn add_membership(&self, tenant_id: &str, user_id: &str) {
        self.state
            .lock()
            .unwrap()
            .memberships
            .insert((tenant_id.to_string(), user_id.to_string()));
    }

    pub fn fail_on(&self, call: &str) {
        self.state.lock().unwrap().failures.insert(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn tenants(&self) -> Vec<TenantListItem> {
        self.state.lock().unwrap().tenants.clone()
    }

    pub fn users(&self) -> Vec<UserListItem> {
        self.state.lock().unwrap().users.clone()
    }

    pub fn applications_of(&self, tenant_id: &str) -> Vec<ApplicationListItem> {
        self.state
            .lock()
            .unwrap()
            .applications
            .iter()
            .filter(|(t, _)| t == tenant_id)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn integration(&self, application_id: &str) -> Option<HttpIntegration> {
        self.state.lock().unwrap().integrations.get(application_id).cloned()
    }

    pub fn is_member(&self, tenant_id: &str, user_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .memberships
            .contains(&(tenant_id.to_string(), user_id.to_string()))
    }

    pub fn device(&self, dev_eui: &str) -> Option<Device> {
        self.state
            .lock()
            .unwrap()
            .devices
            .iter()
            .find(|(e, _)| *e == normalize_eui(dev_eui))
            .map(|(_, d)| d.clone())
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().unwrap().devices.len()
    }

    pub fn keys(&self, dev_eui: &str) -> Option<DeviceKeys> {
        self.state.lock().unwrap().keys.get(&normalize_eui(dev_eui)).cloned()
    }

    pub fn activation(&self, dev_eui: &str) -> Option<DeviceActivation> {
        self.state.lock().unwrap().activations.get(&normalize_eui(dev_eui)).cloned()
    }

    pub fn set_activation(&self, mut activation: DeviceActivation) {
        activation.dev_eui = normalize_eui(&activation.dev_eui);
        self.state
            .lock()
            .unwrap()
            .activations
            .insert(activation.dev_eui.clone(), activation);
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_tenants(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<TenantListItem>> {
        let st = self.state.lock().unwrap();
        // Substring match, like the real search.
        let matching = st
            .tenants
            .iter()
            .filter(|t| search.is_none_or(|s| t.name.contains(s)))
            .cloned();
        Ok(page(matching, limit, offset))
    }

    async fn create_tenant(&self, tenant: &Tenant) -> ConnectorResult<String> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("create_tenant:{}", tenant.name))?;
        let id = st.id("tenant");
        st.tenants.push(TenantListItem {
            id: id.clone(),
            name: tenant.name.clone(),
        });
        Ok(id)
    }

    async fn delete_tenant(&self, tenant_id: &str) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        if !st.tenants.iter().any(|t| t.id == tenant_id) {
            return Err(ConnectorError::not_found(format!("tenant {tenant_id}")));
        }
        st.record(format!("delete_tenant:{tenant_id}"))?;
        st.tenants.retain(|t| t.id != tenant_id);
        Ok(())
    }

    async fn list_users(&self, limit: usize, offset: usize) -> ConnectorResult<Vec<UserListItem>> {
        let st = self.state.lock().unwrap();
        Ok(page(st.users.iter().cloned(), limit, offset))
    }

    async fn create_user(&self, user: &User) -> ConnectorResult<String> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("create_user:{}", user.email))?;
        let id = st.id("user");
        st.users.push(UserListItem {
            id: id.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            is_active: user.is_active,
        });
        Ok(id)
    }

    async fn delete_user(&self, user_id: &str) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        if !st.users.iter().any(|u| u.id == user_id) {
            return Err(ConnectorError::not_found(format!("user {user_id}")));
        }
        st.record(format!("delete_user:{user_id}"))?;
        st.users.retain(|u| u.id != user_id);
        Ok(())
    }

    async fn get_tenant_user(&self, tenant_id: &str, user_id: &str) -> ConnectorResult<TenantUser> {
        let st = self.state.lock().unwrap();
        if st
            .memberships
            .contains(&(tenant_id.to_string(), user_id.to_string()))
        {
            Ok(TenantUser {
                tenant_id: tenant_id.to_string(),
                user_id: user_id.to_string(),
                ..Default::default()
            })
        } else {
            Err(ConnectorError::not_found("tenant user"))
        }
    }

    async fn add_tenant_user(&self, membership: &TenantUser) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        st.record(format!(
            "add_tenant_user:{}:{}",
            membership.tenant_id, membership.user_id
        ))?;
        st.memberships
            .insert((membership.tenant_id.clone(), membership.user_id.clone()));
        Ok(())
    }

    async fn list_applications(
        &self,
        tenant_id: &str,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<ApplicationListItem>> {
        let st = self.state.lock().unwrap();
        let matching = st
            .applications
            .iter()
            .filter(|(t, a)| t == tenant_id && search.is_none_or(|s| a.name.contains(s)))
            .map(|(_, a)| a.clone());
        Ok(page(matching, limit, offset))
    }

    async fn create_application(&self, application: &Application) -> ConnectorResult<String> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("create_application:{}", application.tenant_id))?;
        let id = st.id("app");
        st.applications.push((
            application.tenant_id.clone(),
            ApplicationListItem {
                id: id.clone(),
                name: application.name.clone(),
                description: application.description.clone(),
            },
        ));
        Ok(id)
    }

    async fn get_http_integration(&self, application_id: &str) -> ConnectorResult<HttpIntegration> {
        self.integration(application_id)
            .ok_or_else(|| ConnectorError::not_found("integration"))
    }

    async fn create_http_integration(&self, integration: &HttpIntegration) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        st.record(format!(
            "create_http_integration:{}",
            integration.application_id
        ))?;
        st.integrations
            .insert(integration.application_id.clone(), integration.clone());
        Ok(())
    }

    async fn delete_http_integration(&self, application_id: &str) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("delete_http_integration:{application_id}"))?;
        st.integrations.remove(application_id);
        Ok(())
    }

    async fn list_devices(
        &self,
        application_id: &str,
        limit: usize,
        offset: usize,
    ) -> ConnectorResult<Vec<DeviceListItem>> {
        let st = self.state.lock().unwrap();
        let matching = st
            .devices
            .iter()
            .filter(|(_, d)| d.application_id == application_id)
            .map(|(_, d)| DeviceListItem {
                dev_eui: d.dev_eui.clone(),
                name: d.name.clone(),
                description: d.description.clone(),
                device_profile_id: d.device_profile_id.clone(),
            });
        Ok(page(matching, limit, offset))
    }

    async fn get_device(&self, dev_eui: &str) -> ConnectorResult<Device> {
        self.device(dev_eui)
            .ok_or_else(|| ConnectorError::not_found(format!("device {dev_eui}")))
    }

    async fn create_device(&self, device: &Device) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("create_device:{}", device.dev_eui))?;
        let stored = Device {
            dev_eui: normalize_eui(&device.dev_eui),
            ..device.clone()
        };
        st.devices.push((stored.dev_eui.clone(), stored));
        Ok(())
    }

    async fn update_device(&self, device: &Device) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("update_device:{}", device.dev_eui))?;
        let key = normalize_eui(&device.dev_eui);
        for (e, d) in st.devices.iter_mut() {
            if *e == key {
                *d = Device {
                    dev_eui: key.clone(),
                    ..device.clone()
                };
            }
        }
        Ok(())
    }

    async fn delete_device(&self, dev_eui: &str) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        let key = normalize_eui(dev_eui);
        if !st.devices.iter().any(|(e, _)| *e == key) {
            return Err(ConnectorError::not_found(format!("device {dev_eui}")));
        }
        st.record(format!("delete_device:{dev_eui}"))?;
        st.devices.retain(|(e, _)| *e != key);
        st.keys.remove(&key);
        st.activations.remove(&key);
        Ok(())
    }

    async fn get_device_profile(&self, profile_id: &str) -> ConnectorResult<DeviceProfile> {
        self.state
            .lock()
            .unwrap()
            .profiles
            .get(profile_id)
            .cloned()
            .ok_or_else(|| ConnectorError::not_found(format!("device profile {profile_id}")))
    }

    async fn get_device_keys(&self, dev_eui: &str) -> ConnectorResult<DeviceKeys> {
        self.keys(dev_eui)
            .ok_or_else(|| ConnectorError::not_found(format!("keys of {dev_eui}")))
    }

    async fn create_device_keys(&self, keys: &DeviceKeys) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("create_device_keys:{}", keys.dev_eui))?;
        let key = normalize_eui(&keys.dev_eui);
        st.keys.insert(
            key.clone(),
            DeviceKeys {
                dev_eui: key,
                ..keys.clone()
            },
        );
        Ok(())
    }

    async fn update_device_keys(&self, keys: &DeviceKeys) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("update_device_keys:{}", keys.dev_eui))?;
        let key = normalize_eui(&keys.dev_eui);
        st.keys.insert(
            key.clone(),
            DeviceKeys {
                dev_eui: key,
                ..keys.clone()
            },
        );
        Ok(())
    }

    async fn get_device_activation(&self, dev_eui: &str) -> ConnectorResult<DeviceActivation> {
        self.activation(dev_eui)
            .ok_or_else(|| ConnectorError::not_found(format!("activation of {dev_eui}")))
    }

    async fn activate_device(&self, activation: &DeviceActivation) -> ConnectorResult<()> {
        let mut st = self.state.lock().unwrap();
        st.record(format!("activate_device:{}", activation.dev_eui))?;
        let key = normalize_eui(&activation.dev_eui);
        st.activations.insert(
            key.clone(),
            DeviceActivation {
                dev_eui: key,
                ..activation.clone()
            },
        );
        Ok(())
    }
}
