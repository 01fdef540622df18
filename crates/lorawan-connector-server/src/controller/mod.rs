//! Reconciliation controller.
//!
//! Converges the control plane towards the platform's desired state:
//! - [`TenantProvisioner`]: one tenant, user, membership, application and
//!   HTTP integration per identity
//! - [`UserLifecycleSync`]: provisions every identity and removes tenants and
//!   users whose identity is gone
//! - [`DeviceReconciler`]: creates, updates, keys and activates managed
//!   devices, and removes devices the registry no longer knows
//!
//! Batch passes never stop at the first failure; errors are collected into
//! an [`AggregateError`] attributed per entity.

mod fanout;
mod owners;
pub mod devices;
pub mod provision;
pub mod users;

use std::sync::Arc;
use std::time::Duration;

use lorawan_connector_core::{AggregateError, ControlPlane, DeviceRegistry, IdentityProvider};
use tracing::{info, warn};

pub use devices::{DesiredDevice, DeviceReconciler, ObservedDevice, ReconcilePlan, desired_state};
pub use provision::{ProvisionedTenant, TenantProvisioner};
pub use users::UserLifecycleSync;

/// Tunables shared by the reconciliation loops.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Page size for identity, tenant, user and application listings
    pub page_size: usize,
    /// Page size for control-plane device listings and registry lookups
    pub device_page_size: usize,
    pub entity_timeout: Duration,
    pub orphan_sweep_timeout: Duration,
    pub max_concurrency: usize,
    pub compare_frame_counters: bool,
    pub owner_cache_ttl: Duration,
    pub protected_users: Vec<String>,
    /// Target URL of every tenant's HTTP integration
    pub event_endpoint: String,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            device_page_size: 100,
            entity_timeout: Duration::from_secs(10),
            orphan_sweep_timeout: Duration::from_secs(600),
            max_concurrency: 32,
            compare_frame_counters: true,
            owner_cache_ttl: Duration::from_secs(60),
            protected_users: vec!["admin".to_string()],
            event_endpoint: format!("http://lorawan-platform-connector:8080{}", crate::EVENT_PATH),
        }
    }
}

impl ReconcileSettings {
    pub fn is_protected(&self, name: &str) -> bool {
        self.protected_users.iter().any(|p| p == name)
    }
}

/// Entry point for full and partial synchronization passes.
pub struct Controller {
    provisioner: Arc<TenantProvisioner>,
    users: UserLifecycleSync,
    devices: Arc<DeviceReconciler>,
}

impl Controller {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        registry: Arc<dyn DeviceRegistry>,
        control_plane: Arc<dyn ControlPlane>,
        settings: ReconcileSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let provisioner = Arc::new(TenantProvisioner::new(
            control_plane.clone(),
            settings.clone(),
        ));
        let users = UserLifecycleSync::new(
            identity.clone(),
            control_plane.clone(),
            provisioner.clone(),
            settings.clone(),
        );
        let devices = Arc::new(DeviceReconciler::new(
            identity,
            registry,
            control_plane,
            provisioner.clone(),
            settings,
        ));
        Self {
            provisioner,
            users,
            devices,
        }
    }

    pub fn provisioner(&self) -> &TenantProvisioner {
        &self.provisioner
    }

    pub fn users(&self) -> &UserLifecycleSync {
        &self.users
    }

    pub fn devices(&self) -> &Arc<DeviceReconciler> {
        &self.devices
    }

    /// Provision all identities, then remove outdated tenants and users.
    pub async fn sync_users(&self) -> Result<(), AggregateError> {
        let mut errors = AggregateError::from(self.users.provision_all().await);
        errors.merge(self.users.delete_outdated().await.into());
        errors.into_result()
    }

    /// Reconcile all managed devices, then remove devices without a
    /// registry counterpart.
    pub async fn sync_devices(&self) -> Result<(), AggregateError> {
        let mut errors = AggregateError::from(self.devices.reconcile_all().await);
        errors.merge(self.devices.delete_outdated().await.into());
        errors.into_result()
    }

    /// Full pass: every stage runs regardless of earlier failures.
    pub async fn sync(&self) -> Result<(), AggregateError> {
        info!("Starting full sync");
        let mut errors = AggregateError::from(self.sync_users().await);
        errors.merge(self.sync_devices().await.into());
        if errors.is_empty() {
            info!("Full sync finished");
        } else {
            warn!(errors = errors.len(), "Full sync finished with errors");
        }
        errors.into_result()
    }
}
