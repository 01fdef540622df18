//! Per-identity tenant provisioning.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use lorawan_connector_core::control_plane::{
    APPLICATION_NAME, Application, Encoding, HttpIntegration, MANAGED_DESCRIPTION, Tenant,
    TenantUser, User,
};
use lorawan_connector_core::{
    ConnectorError, ConnectorResult, ControlPlane, Identity, OptionalExt, collect_pages,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::ReconcileSettings;

/// Header carrying the owning identity on every forwarded uplink.
pub const USER_ID_HEADER: &str = "X-UserID";

/// Control-plane entities backing one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTenant {
    pub tenant_id: String,
    pub user_id: String,
    pub application_id: String,
}

pub struct TenantProvisioner {
    control_plane: Arc<dyn ControlPlane>,
    settings: Arc<ReconcileSettings>,
    /// Serializes resolve-or-create per key within this process.
    creation_locks: CreationLocks,
}

type CreationLocks = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive hold on one resolve-or-create key. The map entry is dropped
/// with the last holder.
struct CreationGuard<'a> {
    locks: &'a CreationLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

async fn lock_creation(locks: &CreationLocks, key: String) -> CreationGuard<'_> {
    let lock = locks.entry(key.clone()).or_default().clone();
    let guard = lock.lock_owned().await;
    CreationGuard {
        locks,
        key,
        guard: Some(guard),
    }
}

/// 0 matches → `None`, 1 → `Some`, more → `Ambiguous`.
fn at_most_one<T>(kind: &'static str, key: &str, mut matches: Vec<T>) -> ConnectorResult<Option<T>> {
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        n => {
            warn!(kind, key, count = n, "Duplicate entries found, refusing to pick one");
            Err(ConnectorError::ambiguous(kind, key, n))
        }
    }
}

impl TenantProvisioner {
    pub fn new(control_plane: Arc<dyn ControlPlane>, settings: Arc<ReconcileSettings>) -> Self {
        Self {
            control_plane,
            settings,
            creation_locks: DashMap::new(),
        }
    }

    /// Keys with a resolve-or-create in flight.
    pub fn creation_lock_count(&self) -> usize {
        self.creation_locks.len()
    }

    /// Make sure the identity owns a fully wired tenant.
    pub async fn ensure(&self, identity: &Identity) -> ConnectorResult<ProvisionedTenant> {
        self.ensure_with_user(identity, None).await
    }

    /// Like [`ensure`](Self::ensure), with the control-plane user id
    /// already known.
    pub async fn ensure_with_user(
        &self,
        identity: &Identity,
        user_id: Option<&str>,
    ) -> ConnectorResult<ProvisionedTenant> {
        if identity.id.is_empty() {
            return Err(ConnectorError::bad_input("identity without id"));
        }
        let email = identity.email().ok_or_else(|| {
            ConnectorError::bad_input(format!("identity {} has no email", identity.id))
        })?;
        if matches!(user_id, Some("")) {
            return Err(ConnectorError::bad_input("empty user id"));
        }

        let tenant_id = self.resolve_or_create_tenant(email).await?;
        let user_id = match user_id {
            Some(id) => id.to_string(),
            None => self.resolve_or_create_user(email).await?,
        };
        self.ensure_membership(&tenant_id, &user_id, email).await?;
        let application_id = self.resolve_or_create_application(&tenant_id).await?;
        self.ensure_integration(&application_id, &identity.id).await?;

        debug!(identity_id = %identity.id, tenant_id = %tenant_id, "Identity provisioned");
        Ok(ProvisionedTenant {
            tenant_id,
            user_id,
            application_id,
        })
    }

    /// Tenant named exactly `email`, if any.
    pub async fn find_tenant(&self, email: &str) -> ConnectorResult<Option<String>> {
        let cp = &self.control_plane;
        let tenants = collect_pages(self.settings.page_size, |limit, offset| {
            cp.list_tenants(Some(email), limit, offset)
        })
        .await?;
        let matches = tenants
            .into_iter()
            .filter(|t| t.name == email)
            .map(|t| t.id)
            .collect();
        at_most_one("tenant", email, matches)
    }

    pub async fn resolve_or_create_tenant(&self, email: &str) -> ConnectorResult<String> {
        let _guard = lock_creation(&self.creation_locks, format!("tenant:{email}")).await;
        if let Some(id) = self.find_tenant(email).await? {
            return Ok(id);
        }
        let id = self.control_plane.create_tenant(&Tenant::managed(email)).await?;
        info!(tenant_id = %id, email, "Created tenant");
        Ok(id)
    }

    /// Control-plane user with exactly this email, if any.
    pub async fn find_user(&self, email: &str) -> ConnectorResult<Option<String>> {
        let cp = &self.control_plane;
        let users = collect_pages(self.settings.page_size, |limit, offset| {
            cp.list_users(limit, offset)
        })
        .await?;
        let matches = users
            .into_iter()
            .filter(|u| u.email == email)
            .map(|u| u.id)
            .collect();
        at_most_one("user", email, matches)
    }

    async fn resolve_or_create_user(&self, email: &str) -> ConnectorResult<String> {
        let _guard = lock_creation(&self.creation_locks, format!("user:{email}")).await;
        if let Some(id) = self.find_user(email).await? {
            return Ok(id);
        }
        let id = self.control_plane.create_user(&User::managed(email)).await?;
        info!(user_id = %id, email, "Created user");
        Ok(id)
    }

    async fn ensure_membership(
        &self,
        tenant_id: &str,
        user_id: &str,
        email: &str,
    ) -> ConnectorResult<()> {
        if self
            .control_plane
            .get_tenant_user(tenant_id, user_id)
            .await
            .optional()?
            .is_some()
        {
            return Ok(());
        }
        self.control_plane
            .add_tenant_user(&TenantUser {
                tenant_id: tenant_id.to_string(),
                user_id: user_id.to_string(),
                email: email.to_string(),
                is_admin: false,
                is_device_admin: false,
                is_gateway_admin: false,
            })
            .await?;
        info!(tenant_id, user_id, "Added user to tenant");
        Ok(())
    }

    /// The tenant's integration application, if any.
    pub async fn find_application(&self, tenant_id: &str) -> ConnectorResult<Option<String>> {
        let cp = &self.control_plane;
        let apps = collect_pages(self.settings.page_size, |limit, offset| {
            cp.list_applications(tenant_id, Some(APPLICATION_NAME), limit, offset)
        })
        .await?;
        let matches = apps
            .into_iter()
            .filter(|a| a.name == APPLICATION_NAME)
            .map(|a| a.id)
            .collect();
        at_most_one("application", tenant_id, matches)
    }

    pub async fn resolve_or_create_application(&self, tenant_id: &str) -> ConnectorResult<String> {
        let _guard = lock_creation(&self.creation_locks, format!("application:{tenant_id}")).await;
        if let Some(id) = self.find_application(tenant_id).await? {
            return Ok(id);
        }
        let id = self
            .control_plane
            .create_application(&Application {
                id: String::new(),
                tenant_id: tenant_id.to_string(),
                name: APPLICATION_NAME.to_string(),
                description: MANAGED_DESCRIPTION.to_string(),
            })
            .await?;
        info!(tenant_id, application_id = %id, "Created application");
        Ok(id)
    }

    fn desired_integration(&self, application_id: &str, identity_id: &str) -> HttpIntegration {
        HttpIntegration {
            application_id: application_id.to_string(),
            headers: HashMap::from([(USER_ID_HEADER.to_string(), identity_id.to_string())]),
            encoding: Encoding::Protobuf,
            event_endpoint_url: self.settings.event_endpoint.clone(),
        }
    }

    async fn ensure_integration(&self, application_id: &str, identity_id: &str) -> ConnectorResult<()> {
        let desired = self.desired_integration(application_id, identity_id);
        let existing = self
            .control_plane
            .get_http_integration(application_id)
            .await
            .optional()?;
        match existing {
            Some(current)
                if current.event_endpoint_url == desired.event_endpoint_url
                    && current.encoding == desired.encoding =>
            {
                return Ok(());
            }
            Some(current) => {
                info!(
                    application_id,
                    current_url = %current.event_endpoint_url,
                    desired_url = %desired.event_endpoint_url,
                    "Replacing outdated HTTP integration"
                );
                self.control_plane
                    .delete_http_integration(application_id)
                    .await
                    .optional()?;
            }
            None => {}
        }
        self.control_plane.create_http_integration(&desired).await?;
        info!(application_id, "Created HTTP integration");
        Ok(())
    }

    /// Remove the user and then the tenant belonging to `email`.
    pub async fn delete_user(&self, email: &str) -> ConnectorResult<()> {
        if let Some(user_id) = self.find_user(email).await? {
            self.control_plane.delete_user(&user_id).await.optional()?;
            info!(user_id = %user_id, email, "Deleted user");
        }
        if let Some(tenant_id) = self.find_tenant(email).await? {
            self.control_plane.delete_tenant(&tenant_id).await.optional()?;
            info!(tenant_id = %tenant_id, email, "Deleted tenant");
        }
        Ok(())
    }
}
