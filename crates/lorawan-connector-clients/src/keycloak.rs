//! Keycloak-backed identity provider.

use async_trait::async_trait;
use lorawan_connector_core::{ConnectorResult, Identity, IdentityProvider};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::credential::{AccessToken, CredentialCell, TokenSource};
use crate::http::{decode, normalize_base, segment, transport_error};

/// Connection settings for a Keycloak realm.
#[derive(Debug, Clone)]
pub struct KeycloakSettings {
    pub url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
}

impl KeycloakSettings {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            realm: "master".to_string(),
            client_id: client_id.into(),
            client_secret: String::new(),
        }
    }

    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = secret.into();
        self
    }
}

/// Token issuer using the client-credentials grant.
pub struct KeycloakAuth {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl KeycloakAuth {
    pub fn new(http: reqwest::Client, settings: &KeycloakSettings) -> ConnectorResult<Self> {
        let base = normalize_base(&settings.url)?;
        Ok(Self {
            http,
            token_url: format!(
                "{base}/realms/{}/protocol/openid-connect/token",
                segment(&settings.realm)
            ),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        })
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> ConnectorResult<AccessToken> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp, "access token").await
    }
}

#[async_trait]
impl TokenSource for KeycloakAuth {
    async fn login(&self) -> ConnectorResult<AccessToken> {
        self.request_token(&[
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    async fn refresh(&self, current: &AccessToken) -> ConnectorResult<AccessToken> {
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return self.login().await;
        };
        let refreshed = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("refresh_token", refresh_token),
            ])
            .await;
        match refreshed {
            Ok(token) => Ok(token),
            Err(e) => {
                warn!(error = %e, "Refresh grant rejected, logging in again");
                self.login().await
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeycloakUser {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<KeycloakUser> for Identity {
    fn from(u: KeycloakUser) -> Self {
        let full_name = [u.first_name.as_deref(), u.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let display_name = if full_name.is_empty() {
            u.username.clone()
        } else {
            Some(full_name)
        };
        Identity {
            id: u.id,
            username: u.username,
            email: u.email,
            display_name,
        }
    }
}

/// Lists realm users through the admin API.
pub struct KeycloakIdentityProvider {
    http: reqwest::Client,
    users_url: String,
    credentials: CredentialCell,
}

impl KeycloakIdentityProvider {
    pub fn new(
        http: reqwest::Client,
        settings: &KeycloakSettings,
        credentials: CredentialCell,
    ) -> ConnectorResult<Self> {
        let base = normalize_base(&settings.url)?;
        Ok(Self {
            http,
            users_url: format!("{base}/admin/realms/{}/users", segment(&settings.realm)),
            credentials,
        })
    }
}

#[async_trait]
impl IdentityProvider for KeycloakIdentityProvider {
    async fn list_identities(&self, first: usize, max: usize) -> ConnectorResult<Vec<Identity>> {
        let resp = self
            .http
            .get(&self.users_url)
            .bearer_auth(self.credentials.bearer())
            .query(&[("first", first), ("max", max)])
            .send()
            .await
            .map_err(transport_error)?;
        let users: Vec<KeycloakUser> = decode(resp, "identities").await?;
        debug!(first, count = users.len(), "Listed identities");
        Ok(users.into_iter().map(Identity::from).collect())
    }

    async fn get_identity(&self, id: &str) -> ConnectorResult<Identity> {
        let resp = self
            .http
            .get(format!("{}/{}", self.users_url, segment(id)))
            .bearer_auth(self.credentials.bearer())
            .send()
            .await
            .map_err(transport_error)?;
        let user: KeycloakUser = decode(resp, &format!("identity {id}")).await?;
        Ok(user.into())
    }
}
