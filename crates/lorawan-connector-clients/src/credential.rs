//! Shared access token for the upstream platform APIs.
//!
//! The token lives in a [`CredentialCell`] that is handed to every client
//! needing it. Readers never block; the single [`CredentialManager`] task
//! swaps in a fresh token shortly before the current one expires.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use lorawan_connector_core::ConnectorResult;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Lower bound for the refresh delay, whatever the token lifetime.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Delay before the next attempt after a failed refresh.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// OAuth2 token response as issued by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expires_in: u64,
}

impl AccessToken {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            ..Default::default()
        }
    }
}

/// Lock-free holder of the current access token.
#[derive(Clone)]
pub struct CredentialCell {
    inner: Arc<ArcSwap<AccessToken>>,
}

impl CredentialCell {
    pub fn new(token: AccessToken) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(token)),
        }
    }

    pub fn read(&self) -> Arc<AccessToken> {
        self.inner.load_full()
    }

    pub fn swap(&self, token: AccessToken) {
        self.inner.store(Arc::new(token));
    }

    /// Current bearer token value.
    pub fn bearer(&self) -> String {
        self.inner.load().access_token.clone()
    }
}

impl std::fmt::Debug for CredentialCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCell")
            .field("expires_in", &self.inner.load().expires_in)
            .finish_non_exhaustive()
    }
}

/// Issuer of access tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn login(&self) -> ConnectorResult<AccessToken>;

    /// Exchange `current` for a fresh token.
    async fn refresh(&self, current: &AccessToken) -> ConnectorResult<AccessToken>;
}

/// Background refresher for a [`CredentialCell`].
pub struct CredentialManager {
    cell: CredentialCell,
    source: Arc<dyn TokenSource>,
    margin: Duration,
}

impl CredentialManager {
    pub fn new(cell: CredentialCell, source: Arc<dyn TokenSource>, margin: Duration) -> Self {
        Self {
            cell,
            source,
            margin,
        }
    }

    /// Time to wait before refreshing `token`.
    pub fn refresh_delay(&self, token: &AccessToken) -> Duration {
        Duration::from_secs(token.expires_in)
            .saturating_sub(self.margin)
            .max(MIN_REFRESH_DELAY)
    }

    /// Attempt a single refresh. On failure the current token is kept.
    pub async fn refresh_once(&self) -> bool {
        let current = self.cell.read();
        match self.source.refresh(&current).await {
            Ok(token) => {
                debug!(expires_in = token.expires_in, "Access token refreshed");
                self.cell.swap(token);
                true
            }
            Err(e) => {
                error!(error = %e, "Access token refresh failed, keeping current token");
                false
            }
        }
    }

    /// Run the refresh loop until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        info!(margin_secs = self.margin.as_secs(), "Starting credential refresh");
        let mut delay = self.refresh_delay(&self.cell.read());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Credential refresh stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = if self.refresh_once().await {
                self.refresh_delay(&self.cell.read())
            } else {
                RETRY_DELAY
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorawan_connector_core::ConnectorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn login(&self) -> ConnectorResult<AccessToken> {
            Ok(AccessToken::new("login", 300))
        }

        async fn refresh(&self, _current: &AccessToken) -> ConnectorResult<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                Err(ConnectorError::Transport("connection refused".into()))
            } else {
                Ok(AccessToken::new(format!("token-{n}"), 300))
            }
        }
    }

    fn manager(fail: bool) -> (CredentialCell, CredentialManager) {
        let cell = CredentialCell::new(AccessToken::new("initial", 300));
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail,
        });
        let manager = CredentialManager::new(cell.clone(), source, Duration::from_secs(10));
        (cell, manager)
    }

    #[test]
    fn test_refresh_delay_applies_margin_and_floor() {
        let (_, m) = manager(false);
        assert_eq!(
            m.refresh_delay(&AccessToken::new("t", 300)),
            Duration::from_secs(290)
        );
        assert_eq!(m.refresh_delay(&AccessToken::new("t", 5)), MIN_REFRESH_DELAY);
        assert_eq!(m.refresh_delay(&AccessToken::new("t", 0)), MIN_REFRESH_DELAY);
    }

    #[tokio::test]
    async fn test_refresh_swaps_token() {
        let (cell, m) = manager(false);
        let before = cell.read();
        assert!(m.refresh_once().await);
        assert_eq!(cell.bearer(), "token-1");
        // Readers holding the old Arc keep a consistent value.
        assert_eq!(before.access_token, "initial");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_token() {
        let (cell, m) = manager(true);
        assert!(!m.refresh_once().await);
        assert_eq!(cell.bearer(), "initial");
    }

    #[tokio::test]
    async fn test_spawned_task_stops_on_cancel() {
        let (_, m) = manager(false);
        let cancel = CancellationToken::new();
        let handle = m.spawn(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop")
            .expect("task should not panic");
    }
}
