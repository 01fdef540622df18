pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod events;
pub mod handlers;
pub mod observability;
pub mod scheduler;
pub mod server;

pub use config::AppConfig;
pub use controller::{Controller, ReconcileSettings};
pub use observability::init_tracing;
pub use server::build_router;

/// Path the control plane's HTTP integration posts uplink events to.
pub const EVENT_PATH: &str = "/event";
