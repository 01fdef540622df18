//! Collaborator implementations over HTTP.
//!
//! - [`keycloak`]: identity provider and token source (Keycloak admin API)
//! - [`device_repo`]: device registry (platform device repository)
//! - [`chirpstack`]: network-server control plane (ChirpStack REST API)
//! - [`credential`]: the shared access token and its refresh task

pub mod chirpstack;
pub mod credential;
pub mod device_repo;
mod http;
pub mod keycloak;

pub use chirpstack::ChirpstackClient;
pub use credential::{AccessToken, CredentialCell, CredentialManager, TokenSource};
pub use device_repo::DeviceRepoClient;
pub use http::build_http_client;
pub use keycloak::{KeycloakAuth, KeycloakIdentityProvider, KeycloakSettings};
