//! Core types for the LoRaWAN platform connector.
//!
//! This crate holds everything the reconciliation loops share without
//! depending on a transport:
//! - the upstream model (identities, device types, managed devices)
//! - the control-plane model (tenants, users, applications, devices)
//! - the collaborator traits the loops are written against
//! - the error taxonomy and the aggregate error used by batch passes

pub mod control_plane;
pub mod error;
pub mod identity;
pub mod model;
pub mod pagination;
pub mod registry;

pub use control_plane::ControlPlane;
pub use error::{AggregateError, ConnectorError, ConnectorResult, EntityError, OptionalExt};
pub use identity::IdentityProvider;
pub use model::{Attribute, AttributeFilter, DeviceType, Identity, ManagedDevice};
pub use pagination::collect_pages;
pub use registry::DeviceRegistry;
