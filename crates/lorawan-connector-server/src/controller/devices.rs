//! Managed device reconciliation.
//!
//! A managed device is a registry device whose device type carries the
//! connector's managed-by marker. For each one the control plane must hold a
//! device in the owner's integration application, with keys and (for ABP
//! devices) a session activation derived from the device attributes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lorawan_connector_core::control_plane::{
    Device, DeviceActivation, DeviceKeys, MANAGED_DESCRIPTION, TenantListItem, ZERO_KEY,
};
use lorawan_connector_core::model::attributes;
use lorawan_connector_core::{
    AggregateError, AttributeFilter, ConnectorError, ConnectorResult, ControlPlane,
    DeviceRegistry, DeviceType, IdentityProvider, ManagedDevice, OptionalExt, collect_pages,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::fanout::FanOut;
use super::owners::OwnerCache;
use super::{ReconcileSettings, TenantProvisioner};

/// Control-plane state derived from one managed device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredDevice {
    pub device: Device,
    pub keys: DeviceKeys,
    /// `None` when the device carries no session attributes.
    pub activation: Option<DeviceActivation>,
}

/// What the control plane currently holds for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedDevice {
    pub device: Device,
    pub keys: Option<DeviceKeys>,
    pub activation: Option<DeviceActivation>,
}

/// Mutations needed to converge one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub create: bool,
    pub update: bool,
    pub create_keys: bool,
    pub update_keys: bool,
    pub activate: bool,
}

impl ReconcilePlan {
    pub fn compute(
        desired: &DesiredDevice,
        observed: Option<&ObservedDevice>,
        supports_otaa: bool,
        compare_frame_counters: bool,
    ) -> Self {
        let Some(observed) = observed else {
            return Self {
                create: true,
                update: false,
                create_keys: true,
                update_keys: false,
                activate: desired.activation.is_some(),
            };
        };
        let create_keys = observed.keys.is_none();
        let update_keys = !create_keys
            && supports_otaa
            && observed.keys.as_ref() != Some(&desired.keys);
        let activate = match (&desired.activation, &observed.activation) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(want), Some(have)) => !want.matches(have, compare_frame_counters),
        };
        Self {
            create: false,
            update: observed.device.name != desired.device.name,
            create_keys,
            update_keys,
            activate,
        }
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

fn attribute_or<'a>(device: &'a ManagedDevice, key: &str, fallback: &'a str) -> &'a str {
    match device.attribute(key) {
        Some(v) if !v.is_empty() => v,
        _ => fallback,
    }
}

/// Derive the desired control-plane state of `device`.
///
/// The application id is left empty; the caller fills it in once the
/// owner's tenant is resolved.
pub fn desired_state(device: &ManagedDevice) -> ConnectorResult<DesiredDevice> {
    // The control plane reports EUIs in lowercase hex.
    let dev_eui = device.local_id.trim().to_ascii_lowercase();
    if dev_eui.is_empty() {
        return Err(ConnectorError::bad_input(format!(
            "device {} has no local id",
            device.id
        )));
    }
    let device_type = device.device_type.as_ref().ok_or_else(|| {
        ConnectorError::bad_input(format!("device {} has no expanded device type", device.id))
    })?;
    let profile_id = device_type.device_profile_id().ok_or_else(|| {
        ConnectorError::bad_input(format!(
            "device type {} has no device profile id",
            device_type.id
        ))
    })?;

    let control_device = Device {
        dev_eui: dev_eui.clone(),
        name: device.effective_name().to_string(),
        description: MANAGED_DESCRIPTION.to_string(),
        device_profile_id: profile_id.to_string(),
        join_eui: attribute_or(device, attributes::JOIN_EUI, "").to_string(),
        ..Default::default()
    };

    let keys = DeviceKeys {
        dev_eui: dev_eui.clone(),
        nwk_key: attribute_or(device, attributes::NWK_KEY, ZERO_KEY).to_string(),
        app_key: attribute_or(device, attributes::APP_KEY, ZERO_KEY).to_string(),
        gen_app_key: attribute_or(device, attributes::GEN_APP_KEY, ZERO_KEY).to_string(),
    };

    let activation = DeviceActivation {
        dev_eui,
        dev_addr: attribute_or(device, attributes::DEV_ADDR, "").to_string(),
        app_s_key: attribute_or(device, attributes::APP_S_KEY, "").to_string(),
        nwk_s_enc_key: attribute_or(device, attributes::NWK_S_ENC_KEY, "").to_string(),
        s_nwk_s_int_key: attribute_or(device, attributes::S_NWK_S_INT_KEY, "").to_string(),
        f_nwk_s_int_key: attribute_or(device, attributes::F_NWK_S_INT_KEY, "").to_string(),
        ..Default::default()
    };
    let has_session = [
        &activation.dev_addr,
        &activation.app_s_key,
        &activation.nwk_s_enc_key,
        &activation.s_nwk_s_int_key,
        &activation.f_nwk_s_int_key,
    ]
    .iter()
    .any(|v| !v.is_empty());

    Ok(DesiredDevice {
        device: control_device,
        keys,
        activation: has_session.then_some(activation),
    })
}

pub struct DeviceReconciler {
    registry: Arc<dyn DeviceRegistry>,
    control_plane: Arc<dyn ControlPlane>,
    identity: Arc<dyn IdentityProvider>,
    provisioner: Arc<TenantProvisioner>,
    owners: OwnerCache,
    settings: Arc<ReconcileSettings>,
    /// Outer fan-out level (device types, tenants)
    batch_permits: Arc<Semaphore>,
    /// Inner fan-out level (single devices)
    entity_permits: Arc<Semaphore>,
}

impl DeviceReconciler {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        registry: Arc<dyn DeviceRegistry>,
        control_plane: Arc<dyn ControlPlane>,
        provisioner: Arc<TenantProvisioner>,
        settings: Arc<ReconcileSettings>,
    ) -> Self {
        let width = settings.max_concurrency.max(1);
        Self {
            owners: OwnerCache::new(identity.clone(), settings.owner_cache_ttl),
            registry,
            control_plane,
            identity,
            provisioner,
            settings,
            batch_permits: Arc::new(Semaphore::new(width)),
            entity_permits: Arc::new(Semaphore::new(width)),
        }
    }

    /// Converge a single managed device. Returns the applied plan.
    pub async fn reconcile_one(&self, device: &ManagedDevice) -> ConnectorResult<ReconcilePlan> {
        let mut desired = desired_state(device)?;
        let dev_eui = desired.device.dev_eui.clone();

        let owner = self.owners.get(&device.owner_id).await?;
        let email = owner.email().ok_or_else(|| {
            ConnectorError::bad_input(format!("owner {} of {dev_eui} has no email", owner.id))
        })?;
        let tenant_id = self.provisioner.resolve_or_create_tenant(email).await?;
        desired.device.application_id = self
            .provisioner
            .resolve_or_create_application(&tenant_id)
            .await?;

        let observed = self.observe(&dev_eui).await?;
        let profile = self
            .control_plane
            .get_device_profile(&desired.device.device_profile_id)
            .await?;
        let plan = ReconcilePlan::compute(
            &desired,
            observed.as_ref(),
            profile.supports_otaa,
            self.settings.compare_frame_counters,
        );
        if plan.is_noop() {
            debug!(dev_eui = %dev_eui, "Device up to date");
            return Ok(plan);
        }

        self.apply(&desired, &plan).await?;
        info!(
            dev_eui = %dev_eui,
            device_id = %device.id,
            create = plan.create,
            update = plan.update,
            keys = plan.create_keys || plan.update_keys,
            activate = plan.activate,
            "Device reconciled"
        );
        Ok(plan)
    }

    /// [`reconcile_one`](Self::reconcile_one) bounded by the per-entity timeout.
    pub async fn reconcile_with_timeout(
        &self,
        device: &ManagedDevice,
    ) -> ConnectorResult<ReconcilePlan> {
        let timeout = self.settings.entity_timeout;
        tokio::time::timeout(timeout, self.reconcile_one(device))
            .await
            .unwrap_or(Err(ConnectorError::Timeout(timeout)))
    }

    async fn observe(&self, dev_eui: &str) -> ConnectorResult<Option<ObservedDevice>> {
        let Some(device) = self.control_plane.get_device(dev_eui).await.optional()? else {
            return Ok(None);
        };
        let keys = self.control_plane.get_device_keys(dev_eui).await.optional()?;
        let activation = self
            .control_plane
            .get_device_activation(dev_eui)
            .await
            .optional()?;
        Ok(Some(ObservedDevice {
            device,
            keys,
            activation,
        }))
    }

    /// Device, then keys, then activation. Stops at the first failure.
    async fn apply(&self, desired: &DesiredDevice, plan: &ReconcilePlan) -> ConnectorResult<()> {
        let cp = &self.control_plane;
        if plan.create {
            cp.create_device(&desired.device).await?;
        } else if plan.update {
            cp.update_device(&desired.device).await?;
        }
        if plan.create_keys {
            cp.create_device_keys(&desired.keys).await?;
        } else if plan.update_keys {
            cp.update_device_keys(&desired.keys).await?;
        }
        if let (true, Some(activation)) = (plan.activate, &desired.activation) {
            cp.activate_device(activation).await?;
        }
        Ok(())
    }

    /// Reconcile every device of every managed device type.
    pub async fn reconcile_all(self: &Arc<Self>) -> Result<(), AggregateError> {
        let registry = &self.registry;
        let filter = AttributeFilter::managed();
        let device_types = collect_pages(self.settings.page_size, |limit, offset| {
            registry.list_device_types(&filter, limit, offset)
        })
        .await
        .map_err(|e| AggregateError::single("device-types", e))?;

        info!(device_types = device_types.len(), "Reconciling managed devices");
        let mut fanout = FanOut::new(self.batch_permits.clone());
        for device_type in device_types {
            let this = Arc::clone(self);
            fanout.spawn(device_type.id.clone(), async move {
                this.reconcile_type(device_type).await
            });
        }
        fanout.join().await.into_result()
    }

    async fn reconcile_type(self: Arc<Self>, device_type: DeviceType) -> Result<(), AggregateError> {
        let registry = &self.registry;
        let devices = collect_pages(self.settings.page_size, |limit, offset| {
            registry.list_devices_of_type(&device_type.id, limit, offset)
        })
        .await
        .map_err(|e| AggregateError::single(device_type.id.clone(), e))?;

        debug!(device_type_id = %device_type.id, devices = devices.len(), "Reconciling device type");
        let mut fanout = FanOut::new(self.entity_permits.clone());
        for mut device in devices {
            if device.device_type.is_none() {
                device.device_type = Some(device_type.clone());
            }
            let this = Arc::clone(&self);
            fanout.spawn(device.id.clone(), async move {
                this.reconcile_with_timeout(&device).await.map(|_| ()).map_err(|e| {
                    warn!(device_id = %device.id, error = %e, "Failed to reconcile device");
                    AggregateError::single(device.id.clone(), e)
                })
            });
        }
        fanout.join().await.into_result()
    }

    /// Delete control-plane devices the registry no longer knows, bounded
    /// by the sweep timeout.
    pub async fn delete_outdated(self: &Arc<Self>) -> Result<(), AggregateError> {
        let timeout = self.settings.orphan_sweep_timeout;
        match tokio::time::timeout(timeout, Arc::clone(self).sweep()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Device cleanup timed out");
                Err(AggregateError::single(
                    "device-cleanup",
                    ConnectorError::Timeout(timeout),
                ))
            }
        }
    }

    async fn sweep(self: Arc<Self>) -> Result<(), AggregateError> {
        let page_size = self.settings.page_size;
        let idp = &self.identity;
        let cp = &self.control_plane;
        let identities = collect_pages(page_size, |limit, offset| idp.list_identities(offset, limit))
            .await
            .map_err(|e| AggregateError::single("identities", e))?;
        let tenants = collect_pages(page_size, |limit, offset| cp.list_tenants(None, limit, offset))
            .await
            .map_err(|e| AggregateError::single("tenants", e))?;

        let owners: HashMap<&str, &str> = identities
            .iter()
            .filter_map(|i| i.email().map(|email| (email, i.id.as_str())))
            .collect();

        let mut fanout = FanOut::new(self.batch_permits.clone());
        for tenant in tenants {
            let Some(owner_id) = owners.get(tenant.name.as_str()) else {
                warn!(tenant_id = %tenant.id, name = %tenant.name, "Tenant has no owning identity, skipping device cleanup");
                continue;
            };
            let owner_id = owner_id.to_string();
            let this = Arc::clone(&self);
            fanout.spawn(tenant.id.clone(), async move {
                this.sweep_tenant(tenant, owner_id).await
            });
        }
        fanout.join().await.into_result()
    }

    async fn sweep_tenant(&self, tenant: TenantListItem, owner_id: String) -> Result<(), AggregateError> {
        let cp = &self.control_plane;
        let applications = collect_pages(self.settings.page_size, |limit, offset| {
            cp.list_applications(&tenant.id, None, limit, offset)
        })
        .await
        .map_err(|e| AggregateError::single(tenant.id.clone(), e))?;

        let mut errors = AggregateError::new();
        for application in &applications {
            let devices = match collect_pages(self.settings.device_page_size, |limit, offset| {
                cp.list_devices(&application.id, limit, offset)
            })
            .await
            {
                Ok(devices) => devices,
                Err(e) => {
                    errors.push(application.id.clone(), e);
                    continue;
                }
            };
            for chunk in devices.chunks(self.settings.device_page_size) {
                let euis: Vec<String> = chunk.iter().map(|d| d.dev_eui.clone()).collect();
                self.delete_unknown(&owner_id, &euis, &mut errors).await;
            }
        }
        errors.into_result()
    }

    async fn delete_unknown(&self, owner_id: &str, euis: &[String], errors: &mut AggregateError) {
        let known = match self.registry.list_devices_by_local_ids(owner_id, euis).await {
            Ok(known) => known,
            Err(e) => {
                errors.push(format!("registry lookup for {owner_id}"), e);
                return;
            }
        };
        let known: HashSet<String> = known
            .iter()
            .map(|d| d.local_id.to_ascii_lowercase())
            .collect();
        for eui in euis {
            if known.contains(&eui.to_ascii_lowercase()) {
                continue;
            }
            match self.control_plane.delete_device(eui).await.optional() {
                Ok(_) => info!(dev_eui = %eui, owner_id, "Deleted outdated device"),
                Err(e) => {
                    warn!(dev_eui = %eui, error = %e, "Failed to delete outdated device");
                    errors.push(eui.clone(), e);
                }
            }
        }
    }
}
