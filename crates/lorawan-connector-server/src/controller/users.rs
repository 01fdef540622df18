use std::collections::HashSet;
use std::sync::Arc;

use lorawan_connector_core::{
    AggregateError, ConnectorError, ControlPlane, IdentityProvider, OptionalExt, collect_pages,
};
use tracing::{info, warn};

use super::{ReconcileSettings, TenantProvisioner};

/// Keeps control-plane tenants and users aligned with the identity registry.
pub struct UserLifecycleSync {
    identity: Arc<dyn IdentityProvider>,
    control_plane: Arc<dyn ControlPlane>,
    provisioner: Arc<TenantProvisioner>,
    settings: Arc<ReconcileSettings>,
}

impl UserLifecycleSync {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        control_plane: Arc<dyn ControlPlane>,
        provisioner: Arc<TenantProvisioner>,
        settings: Arc<ReconcileSettings>,
    ) -> Self {
        Self {
            identity,
            control_plane,
            provisioner,
            settings,
        }
    }

    /// Provision every identity. One failing identity never stops the batch.
    pub async fn provision_all(&self) -> Result<(), AggregateError> {
        let idp = &self.identity;
        let identities = collect_pages(self.settings.page_size, |limit, offset| {
            idp.list_identities(offset, limit)
        })
        .await
        .map_err(|e| AggregateError::single("identities", e))?;

        let mut errors = AggregateError::new();
        let timeout = self.settings.entity_timeout;
        for identity in &identities {
            let outcome = tokio::time::timeout(timeout, self.provisioner.ensure(identity))
                .await
                .unwrap_or(Err(ConnectorError::Timeout(timeout)));
            if let Err(e) = outcome {
                warn!(identity_id = %identity.id, error = %e, "Failed to provision identity");
                errors.push(identity.id.clone(), e);
            }
        }
        info!(
            identities = identities.len(),
            failed = errors.len(),
            "Provisioned identities"
        );
        errors.into_result()
    }

    /// Remove tenants and users that no identity accounts for.
    ///
    /// A tenant's user is deleted before the tenant itself. Names listed in
    /// the protected set are never touched.
    pub async fn delete_outdated(&self) -> Result<(), AggregateError> {
        let page_size = self.settings.page_size;
        let idp = &self.identity;
        let cp = &self.control_plane;

        let identities = collect_pages(page_size, |limit, offset| idp.list_identities(offset, limit))
            .await
            .map_err(|e| AggregateError::single("identities", e))?;
        let users = collect_pages(page_size, |limit, offset| cp.list_users(limit, offset))
            .await
            .map_err(|e| AggregateError::single("users", e))?;
        let tenants = collect_pages(page_size, |limit, offset| cp.list_tenants(None, limit, offset))
            .await
            .map_err(|e| AggregateError::single("tenants", e))?;

        let known: HashSet<&str> = identities.iter().filter_map(|i| i.email()).collect();
        let tenant_names: HashSet<&str> = tenants.iter().map(|t| t.name.as_str()).collect();
        let mut errors = AggregateError::new();

        for tenant in &tenants {
            if known.contains(tenant.name.as_str()) || self.settings.is_protected(&tenant.name) {
                continue;
            }
            let mut user_removed = true;
            for user in users.iter().filter(|u| u.email == tenant.name) {
                if let Err(e) = cp.delete_user(&user.id).await.optional() {
                    warn!(user_id = %user.id, error = %e, "Failed to delete outdated user");
                    errors.push(user.id.clone(), e);
                    user_removed = false;
                } else {
                    info!(user_id = %user.id, email = %user.email, "Deleted outdated user");
                }
            }
            if !user_removed {
                continue;
            }
            match cp.delete_tenant(&tenant.id).await.optional() {
                Ok(_) => info!(tenant_id = %tenant.id, name = %tenant.name, "Deleted outdated tenant"),
                Err(e) => {
                    warn!(tenant_id = %tenant.id, error = %e, "Failed to delete outdated tenant");
                    errors.push(tenant.id.clone(), e);
                }
            }
        }

        for user in &users {
            if known.contains(user.email.as_str())
                || tenant_names.contains(user.email.as_str())
                || self.settings.is_protected(&user.email)
            {
                continue;
            }
            match cp.delete_user(&user.id).await.optional() {
                Ok(_) => info!(user_id = %user.id, email = %user.email, "Deleted orphan user"),
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "Failed to delete orphan user");
                    errors.push(user.id.clone(), e);
                }
            }
        }

        errors.into_result()
    }
}
