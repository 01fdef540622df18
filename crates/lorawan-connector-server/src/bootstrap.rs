//! Service wiring: clients, controller and background tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lorawan_connector_clients::{
    ChirpstackClient, CredentialCell, CredentialManager, DeviceRepoClient, KeycloakAuth,
    KeycloakIdentityProvider, KeycloakSettings, TokenSource, build_http_client,
};
use lorawan_connector_core::{ControlPlane, DeviceRegistry, IdentityProvider};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::controller::Controller;
use crate::events::ChangeEventDispatcher;
use crate::events::redis::RedisStreamSource;
use crate::handlers::AppState;
use crate::scheduler::PeriodicScheduler;
use crate::server::ConnectorServer;

/// A started connector and its background tasks.
pub struct RunningConnector {
    pub controller: Arc<Controller>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl RunningConnector {
    /// Wait for every background task after cancellation.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }
    }
}

/// Connect to every collaborator and start the background tasks.
///
/// Fails when the identity provider rejects the initial login, the control
/// plane is unreachable, or the event stream cannot be joined.
pub async fn start(cfg: &AppConfig, cancel: CancellationToken) -> anyhow::Result<RunningConnector> {
    let http = build_http_client(cfg.request_timeout())?;

    let keycloak = KeycloakSettings::new(&cfg.keycloak.url, &cfg.keycloak.client_id)
        .with_realm(&cfg.keycloak.realm)
        .with_client_secret(&cfg.keycloak.client_secret);
    let auth = Arc::new(KeycloakAuth::new(http.clone(), &keycloak)?);
    let token = auth
        .login()
        .await
        .context("initial identity provider login failed")?;
    tracing::info!(expires_in = token.expires_in, "Logged in to identity provider");
    let credentials = CredentialCell::new(token);

    let identity: Arc<dyn IdentityProvider> = Arc::new(KeycloakIdentityProvider::new(
        http.clone(),
        &keycloak,
        credentials.clone(),
    )?);
    let registry: Arc<dyn DeviceRegistry> = Arc::new(DeviceRepoClient::new(
        http.clone(),
        &cfg.device_repo.url,
        credentials.clone(),
    )?);
    let control_plane: Arc<dyn ControlPlane> = Arc::new(ChirpstackClient::new(
        http,
        &cfg.chirpstack.url,
        cfg.chirpstack.api_token.clone(),
    )?);

    control_plane
        .list_tenants(None, 1, 0)
        .await
        .context("control plane connectivity check failed")?;
    tracing::info!(url = %cfg.chirpstack.url, "Control plane reachable");

    let controller = Arc::new(Controller::new(
        identity,
        registry.clone(),
        control_plane.clone(),
        cfg.reconcile_settings(),
    ));

    let mut tasks = Vec::new();

    tasks.push(
        CredentialManager::new(
            credentials,
            auth,
            Duration::from_secs(cfg.keycloak.refresh_margin_secs),
        )
        .spawn(cancel.clone()),
    );

    if cfg.events.enabled() {
        let source = RedisStreamSource::connect(cfg.redis_stream_settings())
            .await
            .context("device event stream unavailable")?;
        let dispatcher =
            ChangeEventDispatcher::new(registry, control_plane, controller.devices().clone());
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            dispatcher.run(source, cancel).await;
        }));
    } else {
        tracing::warn!("events.redis_url not set, device change events disabled");
    }

    tasks.push(PeriodicScheduler::new(controller.clone(), cfg.sync.interval()).spawn(cancel.clone()));

    let server = ConnectorServer::new(
        cfg.addr(),
        AppState {
            controller: controller.clone(),
        },
    );
    let server_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server.run(server_cancel.clone()).await {
            tracing::error!(error = %e, "Admin API stopped");
            server_cancel.cancel();
        }
    }));

    Ok(RunningConnector { controller, tasks })
}
