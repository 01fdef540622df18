use std::sync::Arc;
use std::time::Duration;

use lorawan_connector_core::{ConnectorResult, Identity, IdentityProvider};
use moka::future::Cache;

const OWNER_CACHE_CAPACITY: u64 = 10_000;

/// Device owner lookups with a short-lived cache in front of the identity
/// provider. Concurrent misses for the same owner share one fetch.
pub(crate) struct OwnerCache {
    identity: Arc<dyn IdentityProvider>,
    cache: Cache<String, Identity>,
}

impl OwnerCache {
    pub(crate) fn new(identity: Arc<dyn IdentityProvider>, ttl: Duration) -> Self {
        Self {
            identity,
            cache: Cache::builder()
                .max_capacity(OWNER_CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub(crate) async fn get(&self, owner_id: &str) -> ConnectorResult<Identity> {
        self.cache
            .try_get_with(owner_id.to_string(), self.identity.get_identity(owner_id))
            .await
            .map_err(|e| (*e).clone())
    }
}
