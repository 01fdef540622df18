//! Bounded fan-out with wait-for-all error aggregation.

use std::future::Future;
use std::sync::Arc;

use lorawan_connector_core::{AggregateError, ConnectorError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// A group of spawned tasks sharing a concurrency limit.
///
/// Tasks acquire a permit before running, so spawning never blocks. Nested
/// fan-outs must use distinct semaphores: an outer task holding a permit
/// while it waits for inner tasks would otherwise starve them.
pub(crate) struct FanOut {
    tasks: JoinSet<Result<(), AggregateError>>,
    permits: Arc<Semaphore>,
}

impl FanOut {
    pub(crate) fn new(permits: Arc<Semaphore>) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits,
        }
    }

    pub(crate) fn spawn<F>(&mut self, entity: String, task: F)
    where
        F: Future<Output = Result<(), AggregateError>> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Err(AggregateError::single(
                    entity,
                    ConnectorError::Internal("fan-out semaphore closed".into()),
                ));
            };
            task.await
        });
    }

    /// Wait for every task and merge their errors.
    pub(crate) async fn join(mut self) -> AggregateError {
        let mut errors = AggregateError::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => errors.merge(result.into()),
                Err(e) => {
                    error!(error = %e, "Reconciliation task failed");
                    errors.push("task", ConnectorError::Internal(e.to_string()));
                }
            }
        }
        errors
    }
}
