use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, patch, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, AppState};

/// Admin API: health, on-demand provisioning and sync triggers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health-check", get(handlers::health_check))
        .route("/provision", post(handlers::provision))
        .route("/sync", patch(handlers::sync_all))
        .route("/sync/users", patch(handlers::sync_users))
        .route("/sync/devices", patch(handlers::sync_devices))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ConnectorServer {
    addr: SocketAddr,
    app: Router,
}

impl ConnectorServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: build_router(state),
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        Ok(())
    }
}
