//! Incremental device changes from the platform's change-event stream.
//!
//! Each message names a command and a device:
//! - `PUT`: the device was created or changed; reconcile it if managed
//! - `DELETE`: the device is gone; remove it from the control plane
//! - `RIGHTS`: permission changes, irrelevant here
//!
//! Messages are committed after handling whether or not handling
//! succeeded. Failed messages are reported through the error handler and
//! picked up again by the next periodic sync.

pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lorawan_connector_core::{
    ConnectorError, ConnectorResult, ControlPlane, DeviceRegistry, ManagedDevice, OptionalExt,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::{DeviceReconciler, ReconcilePlan};

/// Delay before polling a failing source again.
const SOURCE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Wire format of a device change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub device: Option<ManagedDevice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Put,
    Delete,
    Rights,
    Unknown(String),
}

impl DeviceCommand {
    pub fn kind(&self) -> CommandKind {
        match self.command.to_ascii_uppercase().as_str() {
            "PUT" => CommandKind::Put,
            "DELETE" => CommandKind::Delete,
            "RIGHTS" => CommandKind::Rights,
            _ => CommandKind::Unknown(self.command.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Reconciled(ReconcilePlan),
    Deleted,
    Ignored(&'static str),
}

/// One message taken from a change-event source.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
}

/// At-least-once message source.
#[async_trait]
pub trait ChangeEventSource: Send {
    /// Next message; `None` once the source is exhausted.
    async fn recv(&mut self) -> ConnectorResult<Option<Delivery>>;

    /// Acknowledge a message so it is not redelivered.
    async fn commit(&mut self, delivery: &Delivery) -> ConnectorResult<()>;
}

pub type ErrorHandler = Arc<dyn Fn(&Delivery, &ConnectorError) + Send + Sync>;

pub struct ChangeEventDispatcher {
    registry: Arc<dyn DeviceRegistry>,
    control_plane: Arc<dyn ControlPlane>,
    reconciler: Arc<DeviceReconciler>,
    on_error: ErrorHandler,
}

impl ChangeEventDispatcher {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        control_plane: Arc<dyn ControlPlane>,
        reconciler: Arc<DeviceReconciler>,
    ) -> Self {
        Self {
            registry,
            control_plane,
            reconciler,
            on_error: Arc::new(|delivery, e| {
                error!(message_id = %delivery.id, error = %e, "Failed to handle device event");
            }),
        }
    }

    #[must_use]
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = handler;
        self
    }

    /// Decode and apply a single message.
    pub async fn handle(&self, payload: &[u8]) -> ConnectorResult<DispatchOutcome> {
        let command: DeviceCommand = serde_json::from_slice(payload)
            .map_err(|e| ConnectorError::bad_input(format!("invalid device event: {e}")))?;

        match command.kind() {
            CommandKind::Rights => Ok(DispatchOutcome::Ignored("rights change")),
            CommandKind::Put => self.handle_put(&command).await,
            CommandKind::Delete => self.handle_delete(&command).await,
            CommandKind::Unknown(name) => {
                warn!(command = %name, id = %command.id, "Unknown device command, ignoring");
                Ok(DispatchOutcome::Ignored("unknown command"))
            }
        }
    }

    async fn handle_put(&self, command: &DeviceCommand) -> ConnectorResult<DispatchOutcome> {
        if command.id.is_empty() {
            return Err(ConnectorError::bad_input("PUT without device id"));
        }
        let device = self.registry.get_device(&command.id).await?;
        if !device.is_managed() {
            debug!(device_id = %command.id, "Device type not managed, ignoring");
            return Ok(DispatchOutcome::Ignored("unmanaged device type"));
        }
        let plan = self.reconciler.reconcile_with_timeout(&device).await?;
        Ok(DispatchOutcome::Reconciled(plan))
    }

    async fn handle_delete(&self, command: &DeviceCommand) -> ConnectorResult<DispatchOutcome> {
        let dev_eui = command
            .device
            .as_ref()
            .map(|d| d.local_id.trim().to_ascii_lowercase())
            .filter(|eui| !eui.is_empty())
            .ok_or_else(|| {
                ConnectorError::bad_input(format!("DELETE of {} without local id", command.id))
            })?;
        if self
            .control_plane
            .delete_device(&dev_eui)
            .await
            .optional()?
            .is_some()
        {
            info!(dev_eui = %dev_eui, device_id = %command.id, "Deleted device");
        } else {
            debug!(dev_eui = %dev_eui, "Device already absent");
        }
        Ok(DispatchOutcome::Deleted)
    }

    /// Consume `source` until it is exhausted or `cancel` fires.
    pub async fn run<S: ChangeEventSource>(&self, mut source: S, cancel: CancellationToken) {
        info!("Starting device event consumer");
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = source.recv() => received,
            };
            match received {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.handle(&delivery.payload).await {
                        (self.on_error)(&delivery, &e);
                    }
                    if let Err(e) = source.commit(&delivery).await {
                        error!(message_id = %delivery.id, error = %e, "Failed to commit device event");
                    }
                }
                Ok(None) => {
                    info!("Device event source exhausted");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Device event source error, retrying in 5s");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(SOURCE_RETRY_DELAY) => {}
                    }
                }
            }
        }
        info!("Device event consumer stopped");
    }
}
