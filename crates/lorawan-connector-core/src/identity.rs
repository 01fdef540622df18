use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::model::Identity;

/// Read access to the upstream identity registry.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// One page of identities, `first` being the zero-based offset.
    async fn list_identities(&self, first: usize, max: usize) -> ConnectorResult<Vec<Identity>>;

    /// Fetch a single identity. Unknown ids yield `ConnectorError::NotFound`.
    async fn get_identity(&self, id: &str) -> ConnectorResult<Identity>;
}
