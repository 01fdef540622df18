use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lorawan_connector_core::{AggregateError, ConnectorError, Identity};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::controller::{Controller, ProvisionedTenant};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
}

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    pub status: &'a str,
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Identity claims posted by the platform when a user signs up.
#[derive(Debug, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub preferred_username: String,
}

impl UserInfo {
    /// First required field left empty, if any.
    fn missing_field(&self) -> Option<&'static str> {
        [
            ("sub", &self.sub),
            ("email", &self.email),
            ("preferred_username", &self.preferred_username),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

impl From<UserInfo> for Identity {
    fn from(info: UserInfo) -> Self {
        Identity {
            id: info.sub,
            username: Some(info.preferred_username).filter(|u| !u.is_empty()),
            email: Some(info.email),
            display_name: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvisionQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub tenant_id: String,
    pub user_id: String,
    pub application_id: String,
}

impl From<ProvisionedTenant> for ProvisionResponse {
    fn from(p: ProvisionedTenant) -> Self {
        Self {
            tenant_id: p.tenant_id,
            user_id: p.user_id,
            application_id: p.application_id,
        }
    }
}

pub async fn provision(
    State(state): State<AppState>,
    Query(query): Query<ProvisionQuery>,
    Json(info): Json<UserInfo>,
) -> Result<Json<ProvisionResponse>, ApiError> {
    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing user_id query parameter".into()))?;
    if let Some(field) = info.missing_field() {
        return Err(ApiError::BadRequest(format!("missing {field} in request body")));
    }
    let identity = Identity::from(info);
    let provisioned = state
        .controller
        .provisioner()
        .ensure_with_user(&identity, Some(&user_id))
        .await?;
    tracing::info!(identity_id = %identity.id, tenant_id = %provisioned.tenant_id, "Provisioned via API");
    Ok(Json(provisioned.into()))
}

pub async fn sync_users(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.controller.sync_users().await?;
    Ok(StatusCode::OK)
}

pub async fn sync_devices(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.controller.sync_devices().await?;
    Ok(StatusCode::OK)
}

pub async fn sync_all(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.controller.sync().await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("sync failed: {0}")]
    Sync(#[from] AggregateError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Connector(e) => match e {
                ConnectorError::BadInput(_) => StatusCode::BAD_REQUEST,
                ConnectorError::NotFound(_) => StatusCode::NOT_FOUND,
                ConnectorError::Ambiguous { .. } => StatusCode::CONFLICT,
                ConnectorError::Remote { .. }
                | ConnectorError::Transport(_)
                | ConnectorError::Timeout(_) => StatusCode::BAD_GATEWAY,
                ConnectorError::Config(_) | ConnectorError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::Sync(errors) => json!({
                "error": "sync failed",
                "details": errors.errors().iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            }),
            other => json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}
