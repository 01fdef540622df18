use std::time::Duration;

use lorawan_connector_core::{ConnectorError, ConnectorResult};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

/// Shared reqwest client with a per-request timeout.
pub fn build_http_client(timeout: Duration) -> ConnectorResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConnectorError::Config(format!("http client: {e}")))
}

pub(crate) fn transport_error(e: reqwest::Error) -> ConnectorError {
    ConnectorError::Transport(e.to_string())
}

/// Map non-success statuses onto the error taxonomy. 404 becomes
/// `NotFound(what)` so callers can treat absence as a state.
pub(crate) async fn check_status(resp: Response, what: &str) -> ConnectorResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ConnectorError::not_found(what));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ConnectorError::Remote {
        status: status.as_u16(),
        message: format!("{what}: {body}"),
    })
}

pub(crate) async fn expect_success(resp: Response, what: &str) -> ConnectorResult<()> {
    check_status(resp, what).await.map(|_| ())
}

pub(crate) async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> ConnectorResult<T> {
    check_status(resp, what)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ConnectorError::Internal(format!("decode {what}: {e}")))
}

/// Decode `{"<field>": {...}}` response bodies.
pub(crate) async fn decode_field<T: DeserializeOwned>(
    resp: Response,
    field: &str,
    what: &str,
) -> ConnectorResult<T> {
    let mut body: serde_json::Value = decode(resp, what).await?;
    match body.get_mut(field).map(serde_json::Value::take) {
        Some(serde_json::Value::Null) | None => Err(ConnectorError::not_found(what)),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| ConnectorError::Internal(format!("decode {what}: {e}"))),
    }
}

/// Percent-encode a single path segment.
pub(crate) fn segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

pub(crate) fn normalize_base(url: &str) -> ConnectorResult<String> {
    url::Url::parse(url).map_err(|e| ConnectorError::Config(format!("invalid url '{url}': {e}")))?;
    Ok(url.trim_end_matches('/').to_string())
}
